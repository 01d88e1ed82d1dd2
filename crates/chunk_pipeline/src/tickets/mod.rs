//! Tickets, player presence, and the distance fields they drive.
//!
//! - [`TicketStorage`] / [`Ticket`] / [`TicketType`]: leveled per-chunk demand
//! - [`DistanceManager`]: loading and simulation fields plus player trackers
//! - [`PlayerTicketTracker`]: throttled `PLAYER_LOADING` tickets

mod distance_manager;
mod player_trackers;
mod ticket;

pub use distance_manager::{
  player_simulation_level, DistanceManager, LevelUpdates, LOADING_CEILING, SIMULATION_CEILING,
};
pub use player_trackers::{FixedPlayerDistanceTracker, PlayerTicketTracker, TicketRequest};
pub use ticket::{Ticket, TicketStorage, TicketType};

/// Opaque player identity supplied by the caller.
pub type PlayerId = u64;
