//! Example table-booking backend.
//!
//! Bookings live in an injected [`BookingStore`]; each command holds a
//! shared handle to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{Command, CommandError, CommandRegistry, optional_u32, required_str};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const MAX_PARTY: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub full_name: String,
    pub num_people: u32,
    pub time: NaiveDateTime,
}

#[derive(Debug, Default)]
pub struct BookingStore {
    bookings: Mutex<HashMap<String, Booking>>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, Booking>) -> T) -> Result<T, CommandError> {
        let mut guard = self
            .bookings
            .lock()
            .map_err(|_| CommandError::Failed("booking store unavailable".into()))?;
        Ok(f(&mut guard))
    }

    pub fn get(&self, reference: &str) -> Option<Booking> {
        self.with(|b| b.get(reference).cloned()).ok().flatten()
    }

    pub fn len(&self) -> usize {
        self.with(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Six uppercase characters, e.g. `YEHB3Z`.
fn new_reference() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase()
}

fn parse_time(params: &Map<String, Value>) -> Result<Option<NaiveDateTime>, CommandError> {
    match params.get("time") {
        None | Some(Value::Null) => Ok(None),
        Some(_) => {
            let raw = required_str(params, "time")?;
            NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
                .map(Some)
                .map_err(|_| CommandError::invalid("time", "expected YYYY-MM-DD HH:MM"))
        }
    }
}

fn check_party(n: u32) -> Result<u32, CommandError> {
    if n == 0 || n > MAX_PARTY {
        return Err(CommandError::invalid(
            "num_people",
            format!("must be between 1 and {MAX_PARTY}"),
        ));
    }
    Ok(n)
}

pub struct BookTable {
    store: Arc<BookingStore>,
}

impl Command for BookTable {
    fn name(&self) -> &str {
        "book_table"
    }

    fn description(&self) -> &str {
        "book a table; params: full_name (string), num_people (integer), time (\"YYYY-MM-DD HH:MM\")"
    }

    fn example_params(&self) -> Value {
        json!({"full_name": "Jose James", "num_people": 2, "time": "2024-06-07 18:00"})
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<String, CommandError> {
        let full_name = required_str(params, "full_name")?.to_string();
        let num_people = optional_u32(params, "num_people")?
            .ok_or_else(|| CommandError::invalid("num_people", "missing"))
            .and_then(check_party)?;
        let time = parse_time(params)?.ok_or_else(|| CommandError::invalid("time", "missing"))?;

        let booking = Booking { full_name, num_people, time };
        let reference = self.store.with(|b| {
            let mut reference = new_reference();
            while b.contains_key(&reference) {
                reference = new_reference();
            }
            b.insert(reference.clone(), booking);
            reference
        })?;
        tracing::info!(%reference, "table booked");
        Ok(format!("Booking successful, reference: {reference}"))
    }
}

pub struct ChangeBooking {
    store: Arc<BookingStore>,
}

impl Command for ChangeBooking {
    fn name(&self) -> &str {
        "change_booking"
    }

    fn description(&self) -> &str {
        "change the party size and/or time of a booking; params: reference, num_people?, time?"
    }

    fn example_params(&self) -> Value {
        json!({"reference": "HTLYNN", "num_people": 4})
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<String, CommandError> {
        let reference = required_str(params, "reference")?.to_ascii_uppercase();
        let num_people = optional_u32(params, "num_people")?.map(check_party).transpose()?;
        let time = parse_time(params)?;
        if num_people.is_none() && time.is_none() {
            return Err(CommandError::Failed("nothing to change".into()));
        }

        self.store.with(|b| match b.get_mut(&reference) {
            Some(booking) => {
                if let Some(n) = num_people {
                    booking.num_people = n;
                }
                if let Some(t) = time {
                    booking.time = t;
                }
                Ok(format!(
                    "Booking {reference} changed: {} people at {}",
                    booking.num_people,
                    booking.time.format(TIME_FORMAT)
                ))
            }
            None => Err(CommandError::Failed(format!("no booking with reference {reference}"))),
        })?
    }
}

pub struct CancelBooking {
    store: Arc<BookingStore>,
}

impl Command for CancelBooking {
    fn name(&self) -> &str {
        "cancel_booking"
    }

    fn description(&self) -> &str {
        "cancel a booking; params: reference"
    }

    fn example_params(&self) -> Value {
        json!({"reference": "HTLYNN"})
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<String, CommandError> {
        let reference = required_str(params, "reference")?.to_ascii_uppercase();
        match self.store.with(|b| b.remove(&reference))? {
            Some(_) => Ok("Booking canceled".into()),
            None => Err(CommandError::Failed(format!("no booking with reference {reference}"))),
        }
    }
}

/// Register the three booking commands against one shared store.
pub fn register(registry: &mut CommandRegistry, store: Arc<BookingStore>) -> Result<(), CommandError> {
    registry.register(Box::new(BookTable { store: store.clone() }))?;
    registry.register(Box::new(ChangeBooking { store: store.clone() }))?;
    registry.register(Box::new(CancelBooking { store }))?;
    Ok(())
}
