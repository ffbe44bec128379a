use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// A scheduled trip. Read-only to the reservation core; owned by the catalog.
#[derive(Debug, Clone)]
pub struct Trip {
    pub id: String,
    pub bus_name: String,
    pub bus_type: Option<String>,
    pub origin: String,
    pub destination: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub fare_minor: i64,
    pub seats_total: u32,
    pub seat_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn has_seat(&self, seat_id: &str) -> bool {
        self.seat_ids.iter().any(|s| s == seat_id)
    }
}

#[derive(Debug, Clone)]
pub struct TripSpec {
    pub bus_name: String,
    pub bus_type: Option<String>,
    pub origin: String,
    pub destination: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub fare_minor: i64,
    pub seats_total: u32,
    pub seat_ids: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("trip not found")]
    NotFound,
    #[error("invalid trip: {0}")]
    Invalid(String),
}

/// Record store for scheduled trips. Plain keyed storage; seat accounting
/// lives in the ledger, never here.
#[derive(Default)]
pub struct TripCatalog {
    trips: RwLock<HashMap<String, Trip>>,
}

fn seat_ids_for(spec: &TripSpec) -> Result<Vec<String>, CatalogError> {
    if let Some(ids) = &spec.seat_ids {
        let mut out: Vec<String> = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = raw.trim().to_string();
            if id.is_empty() {
                return Err(CatalogError::Invalid("empty seat id".to_string()));
            }
            if out.iter().any(|s| s == &id) {
                return Err(CatalogError::Invalid(format!("duplicate seat id {id}")));
            }
            out.push(id);
        }
        if out.len() != spec.seats_total as usize {
            return Err(CatalogError::Invalid(
                "seat_ids must cover seats_total exactly".to_string(),
            ));
        }
        Ok(out)
    } else {
        Ok((1..=spec.seats_total).map(|n| n.to_string()).collect())
    }
}

fn validate_spec(spec: &TripSpec) -> Result<(), CatalogError> {
    if spec.bus_name.trim().is_empty() {
        return Err(CatalogError::Invalid("bus_name required".to_string()));
    }
    if spec.origin.trim().is_empty() || spec.destination.trim().is_empty() {
        return Err(CatalogError::Invalid(
            "origin and destination required".to_string(),
        ));
    }
    if spec.fare_minor <= 0 {
        return Err(CatalogError::Invalid("fare must be positive".to_string()));
    }
    if spec.seats_total == 0 || spec.seats_total > 200 {
        return Err(CatalogError::Invalid(
            "seats_total must be in 1..=200".to_string(),
        ));
    }
    if spec.arrive_at <= spec.depart_at {
        return Err(CatalogError::Invalid(
            "arrive_at must be after depart_at".to_string(),
        ));
    }
    Ok(())
}

impl TripCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, spec: TripSpec) -> Result<Trip, CatalogError> {
        validate_spec(&spec)?;
        let seat_ids = seat_ids_for(&spec)?;
        let trip = Trip {
            id: Uuid::new_v4().to_string(),
            bus_name: spec.bus_name.trim().to_string(),
            bus_type: spec.bus_type.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            origin: spec.origin.trim().to_string(),
            destination: spec.destination.trim().to_string(),
            depart_at: spec.depart_at,
            arrive_at: spec.arrive_at,
            fare_minor: spec.fare_minor,
            seats_total: spec.seats_total,
            seat_ids,
            created_at: Utc::now(),
        };
        let mut trips = self.trips.write().expect("catalog lock poisoned");
        trips.insert(trip.id.clone(), trip.clone());
        Ok(trip)
    }

    pub fn get(&self, trip_id: &str) -> Result<Trip, CatalogError> {
        let trips = self.trips.read().expect("catalog lock poisoned");
        trips.get(trip_id).cloned().ok_or(CatalogError::NotFound)
    }

    /// Replaces the schedule fields of an existing trip. The seat-id space is
    /// immutable once the trip exists so outstanding bookings stay valid.
    pub fn update(&self, trip_id: &str, spec: TripSpec) -> Result<Trip, CatalogError> {
        validate_spec(&spec)?;
        let mut trips = self.trips.write().expect("catalog lock poisoned");
        let trip = trips.get_mut(trip_id).ok_or(CatalogError::NotFound)?;
        if spec.seats_total != trip.seats_total || spec.seat_ids.is_some() {
            return Err(CatalogError::Invalid(
                "seat layout cannot change after creation".to_string(),
            ));
        }
        trip.bus_name = spec.bus_name.trim().to_string();
        trip.bus_type = spec
            .bus_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        trip.origin = spec.origin.trim().to_string();
        trip.destination = spec.destination.trim().to_string();
        trip.depart_at = spec.depart_at;
        trip.arrive_at = spec.arrive_at;
        trip.fare_minor = spec.fare_minor;
        Ok(trip.clone())
    }

    pub fn delete(&self, trip_id: &str) -> Result<(), CatalogError> {
        let mut trips = self.trips.write().expect("catalog lock poisoned");
        trips.remove(trip_id).map(|_| ()).ok_or(CatalogError::NotFound)
    }

    /// Trips matching the optional filters, soonest departure first.
    pub fn list(
        &self,
        origin: Option<&str>,
        destination: Option<&str>,
        date: Option<chrono::NaiveDate>,
    ) -> Vec<Trip> {
        let trips = self.trips.read().expect("catalog lock poisoned");
        let mut out: Vec<Trip> = trips
            .values()
            .filter(|t| {
                origin.map_or(true, |o| t.origin.eq_ignore_ascii_case(o.trim()))
                    && destination.map_or(true, |d| t.destination.eq_ignore_ascii_case(d.trim()))
                    && date.map_or(true, |d| t.depart_at.date_naive() == d)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.depart_at.cmp(&b.depart_at));
        out
    }

    /// Distinct origin/destination names, sorted, for search dropdowns.
    pub fn cities(&self) -> Vec<String> {
        let trips = self.trips.read().expect("catalog lock poisoned");
        let mut out: Vec<String> = Vec::new();
        for t in trips.values() {
            for city in [&t.origin, &t.destination] {
                if !out.iter().any(|c| c.eq_ignore_ascii_case(city)) {
                    out.push(city.clone());
                }
            }
        }
        out.sort();
        out
    }
}
