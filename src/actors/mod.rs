//! Actor-based supervision service
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │ supervisor (main)│
//!                 └────────┬─────────┘
//!                          │ spawns
//!                 ┌────────▼─────────┐
//!                 │   PollerActor    │── FleetPoller::poll_all
//!                 └────────┬─────────┘
//!                          │ PollEvent
//!                 ┌────────▼─────────┐
//!                 │ Broadcast Channel│
//!                 └────────┬─────────┘
//!                          │ subscribe
//!              ┌───────────┴───────────┐
//!      ┌───────▼───────┐       ┌───────▼───────┐
//!      │ StorageActor  │       │  AlertActor   │── NotificationBatcher
//!      └───────────────┘       └───────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: the poller publishes one [`messages::PollEvent`] per cycle
//! 3. **Request/Response**: oneshot channels for queries

pub mod alert;
pub mod messages;
pub mod poller;
pub mod storage;
