//! Shared data model: vehicle records, crowd reports, interventions, health.
//!
//! These types are plain value records with no references into the live
//! state store — they're what gets serialized into Redis hashes/lists and
//! back, and what the detectors/engine/scorer pass between each other.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// GTFS-realtime occupancy status, wire-compatible with codes 0-6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
pub enum OccupancyStatus {
    Empty,
    ManySeatsAvailable,
    FewSeatsAvailable,
    StandingRoomOnly,
    CrushedStandingRoomOnly,
    Full,
    NotAcceptingPassengers,
    #[default]
    Unknown,
}

impl OccupancyStatus {
    pub fn from_wire_code(code: i32) -> Self {
        match code {
            0 => Self::Empty,
            1 => Self::ManySeatsAvailable,
            2 => Self::FewSeatsAvailable,
            3 => Self::StandingRoomOnly,
            4 => Self::CrushedStandingRoomOnly,
            5 => Self::Full,
            6 => Self::NotAcceptingPassengers,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::ManySeatsAvailable => "MANY_SEATS_AVAILABLE",
            Self::FewSeatsAvailable => "FEW_SEATS_AVAILABLE",
            Self::StandingRoomOnly => "STANDING_ROOM_ONLY",
            Self::CrushedStandingRoomOnly => "CRUSHED_STANDING_ROOM_ONLY",
            Self::Full => "FULL",
            Self::NotAcceptingPassengers => "NOT_ACCEPTING_PASSENGERS",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "EMPTY" => Self::Empty,
            "MANY_SEATS_AVAILABLE" => Self::ManySeatsAvailable,
            "FEW_SEATS_AVAILABLE" => Self::FewSeatsAvailable,
            "STANDING_ROOM_ONLY" => Self::StandingRoomOnly,
            "CRUSHED_STANDING_ROOM_ONLY" => Self::CrushedStandingRoomOnly,
            "FULL" => Self::Full,
            "NOT_ACCEPTING_PASSENGERS" => Self::NotAcceptingPassengers,
            _ => Self::Unknown,
        }
    }
}

/// A single vehicle's live position and enrichment, as held at `vehicle:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub trip_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<i32>,
    pub speed_kmh: Option<f64>,
    pub occupancy_status: OccupancyStatus,
    pub delay_seconds: i64,
    /// UTC ISO-8601, as provided by the feed.
    pub timestamp: String,
}

/// The atomic output of one poll.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FleetSnapshot {
    pub vehicles: Vec<VehicleRecord>,
    pub timestamp: String,
}

/// Crowding level self-reported by a rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CrowdingLevel {
    Empty,
    Seats,
    Standing,
    Full,
}

impl CrowdingLevel {
    pub fn score(&self) -> f64 {
        match self {
            Self::Empty => 0.0,
            Self::Seats => 1.0,
            Self::Standing => 2.0,
            Self::Full => 3.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Seats => "seats",
            Self::Standing => "standing",
            Self::Full => "full",
        }
    }

    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(Self::Empty),
            "seats" => Some(Self::Seats),
            "standing" => Some(Self::Standing),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// A rider-submitted crowding report. Identity = `{vehicle_id}:{millis}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CrowdReport {
    pub id: String,
    pub vehicle_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub crowding_level: CrowdingLevel,
    pub latitude: f64,
    pub longitude: f64,
    pub reported_at: String,
}

/// Inbound payload for submitting a crowd report (no id/timestamp yet).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CrowdReportRequest {
    pub vehicle_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub crowding_level: CrowdingLevel,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterventionType {
    Hold,
    Deploy,
    Surge,
    Express,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterventionPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl InterventionPriority {
    /// Lower rank sorts first: critical < high < medium < low.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterventionStatus {
    Pending,
    Approved,
    Dismissed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterventionTrigger {
    Bunching,
    Ghost,
    Crowding,
}

/// A controller-facing, prioritised action recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Intervention {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InterventionType,
    pub priority: InterventionPriority,
    pub status: InterventionStatus,
    pub headline: String,
    pub description: String,
    pub route_id: String,
    pub route_name: String,
    pub trigger: InterventionTrigger,
    pub vehicle_id: Option<String>,
    pub target_stop: Option<String>,
    pub hold_seconds: Option<u32>,
    pub depot_name: Option<String>,
    pub passengers_affected: i64,
    pub wait_time_impact_seconds: i64,
    pub confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: String,
    pub expires_at: String,
    pub actioned_at: Option<String>,
}

/// Inbound action verb for `POST /ops/interventions/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterventionAction {
    Approve,
    Dismiss,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthComponent {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub weighted: f64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteHealth {
    pub route_id: String,
    pub route_name: String,
    pub live_vehicles: usize,
    pub on_time_count: usize,
    pub delayed_count: usize,
    pub ghost_vehicles: usize,
    pub bunching_pairs: usize,
    pub crowding_score: f64,
    pub health_score: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub score: i64,
    pub grade: String,
    pub status: String,
    pub components: Vec<HealthComponent>,
    pub top_routes: Vec<RouteHealth>,
    pub total_live_vehicles: usize,
    pub total_routes_active: usize,
    pub interventions_pending: usize,
    pub generated_at: String,
}
