// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Scheduling boundary: availability checks and appointment bookings.
//!
//! The agent only ever talks to the [`Scheduler`] trait; production wires a
//! calendar backend behind it, tests and single-box deployments use
//! [`InMemoryScheduler`]. Creation is idempotent per call id: a retried
//! booking from the same call returns the appointment already made instead
//! of double-booking the slot. A taken slot is a typed, recoverable error
//! the conversation handles by asking for another time.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::call::state::ServiceCategory;
use crate::utils::generate_unique_id;

/// A confirmed appointment.
#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub category: ServiceCategory,
}

/// Everything needed to book a visit.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub call_id: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub issue: String,
    pub category: ServiceCategory,
    pub location: String,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Recoverable: the flow returns to time collection.
    #[error("the {date} {time} slot at {location} is already taken")]
    SlotTaken {
        date: String,
        time: String,
        location: String,
    },
    #[error("no appointment found for {customer} at {location}")]
    NotFound { customer: String, location: String },
    #[error("booking backend unavailable: {detail}")]
    Backend { detail: String },
}

/// Calendar/booking backend seam.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Is this slot free right now? Advisory: a later create can still
    /// conflict if someone else books in between.
    async fn check_availability(
        &self,
        date: &str,
        time: &str,
        location: &str,
    ) -> Result<bool, BookingError>;

    /// Book a visit. Replays from the same call id return the existing
    /// appointment unchanged.
    async fn create_booking(&self, request: &BookingRequest) -> Result<Appointment, BookingError>;

    /// Move a customer's appointment to a new slot.
    async fn reschedule_booking(
        &self,
        customer: &str,
        location: &str,
        new_date: &str,
        new_time: &str,
    ) -> Result<Appointment, BookingError>;

    /// Cancel a customer's appointment, freeing its slot.
    async fn cancel_booking(&self, customer: &str, location: &str) -> Result<(), BookingError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

fn slot_key(date: &str, time: &str, location: &str) -> String {
    format!(
        "{}|{}|{}",
        date.trim().to_lowercase(),
        time.trim().to_lowercase(),
        location.trim().to_lowercase()
    )
}

fn customer_key(customer: &str, location: &str) -> String {
    format!(
        "{}|{}",
        customer.trim().to_lowercase(),
        location.trim().to_lowercase()
    )
}

/// Slot-map scheduler for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    /// slot key -> appointment id holding it.
    slots: DashMap<String, String>,
    /// call id -> appointment created by that call.
    by_call: DashMap<String, Appointment>,
    /// customer key -> that customer's current appointment.
    by_customer: DashMap<String, Appointment>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appointment_count(&self) -> usize {
        self.by_customer.len()
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn check_availability(
        &self,
        date: &str,
        time: &str,
        location: &str,
    ) -> Result<bool, BookingError> {
        Ok(!self.slots.contains_key(&slot_key(date, time, location)))
    }

    async fn create_booking(&self, request: &BookingRequest) -> Result<Appointment, BookingError> {
        if let Some(existing) = self.by_call.get(&request.call_id) {
            tracing::debug!(
                call_id = %request.call_id,
                appointment_id = %existing.id,
                "booking replay, returning existing appointment"
            );
            return Ok(existing.clone());
        }

        let key = slot_key(&request.date, &request.time, &request.location);
        let appointment = Appointment {
            id: generate_unique_id("appt"),
            date: request.date.clone(),
            time: request.time.clone(),
            location: request.location.clone(),
            category: request.category,
        };

        // Entry API keeps check-and-claim atomic per slot.
        match self.slots.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(BookingError::SlotTaken {
                    date: request.date.clone(),
                    time: request.time.clone(),
                    location: request.location.clone(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(appointment.id.clone());
            }
        }

        self.by_call
            .insert(request.call_id.clone(), appointment.clone());
        self.by_customer.insert(
            customer_key(&request.customer_name, &request.location),
            appointment.clone(),
        );
        tracing::info!(
            appointment_id = %appointment.id,
            date = %appointment.date,
            time = %appointment.time,
            "appointment booked"
        );
        Ok(appointment)
    }

    async fn reschedule_booking(
        &self,
        customer: &str,
        location: &str,
        new_date: &str,
        new_time: &str,
    ) -> Result<Appointment, BookingError> {
        let key = customer_key(customer, location);
        let current = self
            .by_customer
            .get(&key)
            .map(|entry| entry.clone())
            .ok_or_else(|| BookingError::NotFound {
                customer: customer.to_string(),
                location: location.to_string(),
            })?;

        let new_slot = slot_key(new_date, new_time, location);
        if self.slots.contains_key(&new_slot) {
            return Err(BookingError::SlotTaken {
                date: new_date.to_string(),
                time: new_time.to_string(),
                location: location.to_string(),
            });
        }

        self.slots
            .remove(&slot_key(&current.date, &current.time, &current.location));
        self.slots.insert(new_slot, current.id.clone());

        let moved = Appointment {
            date: new_date.to_string(),
            time: new_time.to_string(),
            ..current
        };
        self.by_customer.insert(key, moved.clone());
        tracing::info!(appointment_id = %moved.id, date = %moved.date, time = %moved.time, "appointment rescheduled");
        Ok(moved)
    }

    async fn cancel_booking(&self, customer: &str, location: &str) -> Result<(), BookingError> {
        let key = customer_key(customer, location);
        let (_, appointment) =
            self.by_customer
                .remove(&key)
                .ok_or_else(|| BookingError::NotFound {
                    customer: customer.to_string(),
                    location: location.to_string(),
                })?;
        self.slots.remove(&slot_key(
            &appointment.date,
            &appointment.time,
            &appointment.location,
        ));
        self.by_call.retain(|_, appt| appt.id != appointment.id);
        tracing::info!(appointment_id = %appointment.id, "appointment cancelled");
        Ok(())
    }
}
