//! Ticket types and per-chunk ticket storage.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::ChunkPos;

/// Static properties shared by every ticket of one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TicketType {
  pub name: &'static str,
  /// Ticks a ticket lives for. 0 = until removed.
  pub timeout: u64,
  /// Feeds the loading field and may bring chunks into existence.
  pub loading: bool,
  /// Feeds the simulation field.
  pub simulation: bool,
  /// Survives a save. Informational; the pipeline does not write tickets.
  pub persist: bool,
  /// While any such ticket exists the world should stay active.
  pub keep_loaded: bool,
}

impl TicketType {
  pub const START: Self = Self::new("start", 0, true, true, false, true);
  pub const PLAYER_LOADING: Self = Self::new("player_loading", 0, true, false, false, false);
  pub const PLAYER_SIMULATION: Self = Self::new("player_simulation", 0, false, true, false, false);
  pub const FORCED: Self = Self::new("forced", 0, true, true, true, true);
  pub const PORTAL: Self = Self::new("portal", 300, true, true, true, true);
  pub const ENDER_PEARL: Self = Self::new("ender_pearl", 40, true, true, false, true);
  pub const UNKNOWN: Self = Self::new("unknown", 1, true, false, false, false);
  pub const GENERATION_DEPENDENCY: Self =
    Self::new("generation_dependency", 1, true, false, false, false);
  /// Looks at a chunk without loading it. Cannot be added.
  pub const INSPECTION: Self = Self::new("inspection", 0, false, false, false, false);

  pub const fn new(
    name: &'static str,
    timeout: u64,
    loading: bool,
    simulation: bool,
    persist: bool,
    keep_loaded: bool,
  ) -> Self {
    Self {
      name,
      timeout,
      loading,
      simulation,
      persist,
      keep_loaded,
    }
  }

  #[inline]
  pub const fn expires(&self) -> bool {
    self.timeout != 0
  }

  /// Contributes to at least one field.
  #[inline]
  pub const fn can_load(&self) -> bool {
    self.loading || self.simulation
  }
}

impl fmt::Display for TicketType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name)
  }
}

/// A leveled demand on one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
  pub ticket_type: TicketType,
  pub level: u8,
  ticks_left: u64,
}

impl Ticket {
  pub fn new(ticket_type: TicketType, level: u8) -> Self {
    Self {
      ticket_type,
      level,
      ticks_left: ticket_type.timeout,
    }
  }

  /// Remaining ticks, or `None` for tickets that never expire.
  pub fn ticks_left(&self) -> Option<u64> {
    self.ticket_type.expires().then_some(self.ticks_left)
  }

  /// Count down one tick. Returns `true` once the ticket has expired.
  fn tick(&mut self) -> bool {
    if !self.ticket_type.expires() {
      return false;
    }
    self.ticks_left = self.ticks_left.saturating_sub(1);
    self.ticks_left == 0
  }
}

impl fmt::Display for Ticket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.ticks_left() {
      Some(ticks) => write!(f, "{}@{} ({ticks}t)", self.ticket_type, self.level),
      None => write!(f, "{}@{}", self.ticket_type, self.level),
    }
  }
}

type TicketList = SmallVec<[Ticket; 2]>;

/// Tickets grouped by chunk. At most one ticket per `(type, chunk)`.
#[derive(Default)]
pub struct TicketStorage {
  tickets: FxHashMap<ChunkPos, TicketList>,
  count: usize,
}

impl TicketStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert `ticket`, replacing the level and timeout of an existing ticket of
  /// the same type. Returns the replaced ticket.
  pub fn insert(&mut self, pos: ChunkPos, ticket: Ticket) -> Option<Ticket> {
    let list = self.tickets.entry(pos).or_default();
    match list.iter_mut().find(|t| t.ticket_type == ticket.ticket_type) {
      Some(existing) => Some(std::mem::replace(existing, ticket)),
      None => {
        list.push(ticket);
        self.count += 1;
        None
      }
    }
  }

  /// Remove the `ticket_type` ticket on `pos`, if its level matches `level`
  /// (any level when `None`).
  pub fn remove(
    &mut self,
    pos: ChunkPos,
    ticket_type: TicketType,
    level: Option<u8>,
  ) -> Option<Ticket> {
    let list = self.tickets.get_mut(&pos)?;
    let index = list
      .iter()
      .position(|t| t.ticket_type == ticket_type && level.map_or(true, |l| l == t.level))?;
    let removed = list.swap_remove(index);
    if list.is_empty() {
      self.tickets.remove(&pos);
    }
    self.count -= 1;
    Some(removed)
  }

  pub fn get(&self, pos: ChunkPos) -> &[Ticket] {
    self.tickets.get(&pos).map(|list| list.as_slice()).unwrap_or(&[])
  }

  /// Lowest loading-ticket level on `pos`.
  pub fn loading_level(&self, pos: ChunkPos) -> Option<u8> {
    self
      .get(pos)
      .iter()
      .filter(|t| t.ticket_type.loading)
      .map(|t| t.level)
      .min()
  }

  /// Lowest simulation-ticket level on `pos`.
  pub fn simulation_level(&self, pos: ChunkPos) -> Option<u8> {
    self
      .get(pos)
      .iter()
      .filter(|t| t.ticket_type.simulation)
      .map(|t| t.level)
      .min()
  }

  /// Count every timed ticket down once; drop the expired ones.
  ///
  /// Returns the chunks that lost at least one ticket.
  pub fn purge_expired(&mut self) -> Vec<ChunkPos> {
    let mut affected = Vec::new();
    let mut removed = 0;
    self.tickets.retain(|pos, list| {
      let before = list.len();
      list.retain(|ticket| !ticket.tick());
      if list.len() != before {
        affected.push(*pos);
        removed += before - list.len();
      }
      !list.is_empty()
    });
    self.count -= removed;
    affected
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.count
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  pub fn contains(&self, pos: ChunkPos) -> bool {
    self.tickets.contains_key(&pos)
  }

  pub fn any(&self, mut predicate: impl FnMut(&Ticket) -> bool) -> bool {
    self.tickets.values().flatten().any(|t| predicate(t))
  }
}
