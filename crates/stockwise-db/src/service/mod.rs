//! # Services
//!
//! Operations that span several repositories and own the commit boundary.
//!
//! - [`Reconciler`](reconciler::Reconciler) - create, edit and delete stock-affecting transactions
//! - [`BookingService`](booking::BookingService) - create, edit and delete bookings
//! - [`FulfillmentTracker`](fulfillment::FulfillmentTracker) - remaining deliverable quantity

pub mod booking;
pub mod fulfillment;
pub mod reconciler;
