//! Single-assignment result cell with completion callbacks.
//!
//! ```text
//!   Pending(listeners) ──complete(v)──> Done(v)
//!          │                               ▲
//!          └── on_complete(f) queues f     └── on_complete(f) runs f now
//! ```
//!
//! The first `complete` wins; later calls return `false` and leave the value
//! untouched. Listeners run on the completing thread, outside the lock.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

type Listener<T> = Box<dyn FnOnce(&T) + Send + 'static>;

enum State<T> {
  Pending(Vec<Listener<T>>),
  Done(T),
}

/// A value that becomes available exactly once.
pub struct Completion<T> {
  state: Mutex<State<T>>,
  ready: Condvar,
}

impl<T: Clone + Send + 'static> Completion<T> {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State::Pending(Vec::new())),
      ready: Condvar::new(),
    }
  }

  /// A cell that is already done.
  pub fn completed(value: T) -> Self {
    Self {
      state: Mutex::new(State::Done(value)),
      ready: Condvar::new(),
    }
  }

  /// Store `value` if still pending. Returns whether this call completed the cell.
  pub fn complete(&self, value: T) -> bool {
    let listeners = {
      let mut state = self.state.lock();
      match &mut *state {
        State::Done(_) => return false,
        State::Pending(listeners) => {
          let listeners = std::mem::take(listeners);
          *state = State::Done(value.clone());
          listeners
        }
      }
    };
    self.ready.notify_all();
    for listener in listeners {
      listener(&value);
    }
    true
  }

  #[inline]
  pub fn is_done(&self) -> bool {
    matches!(*self.state.lock(), State::Done(_))
  }

  /// The value, if completed.
  pub fn get_now(&self) -> Option<T> {
    match &*self.state.lock() {
      State::Done(value) => Some(value.clone()),
      State::Pending(_) => None,
    }
  }

  /// Run `listener` once the value is available (immediately if it already is).
  pub fn on_complete(&self, listener: impl FnOnce(&T) + Send + 'static) {
    let value = {
      let mut state = self.state.lock();
      match &mut *state {
        State::Pending(listeners) => {
          listeners.push(Box::new(listener));
          return;
        }
        State::Done(value) => value.clone(),
      }
    };
    listener(&value);
  }

  /// Block the calling thread until completed or `timeout` elapses.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
    let mut state = self.state.lock();
    while let State::Pending(_) = &*state {
      if self.ready.wait_for(&mut state, timeout).timed_out() {
        break;
      }
    }
    match &*state {
      State::Done(value) => Some(value.clone()),
      State::Pending(_) => None,
    }
  }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &*self.state.lock() {
      State::Pending(listeners) => f
        .debug_struct("Completion")
        .field("pending_listeners", &listeners.len())
        .finish(),
      State::Done(value) => f.debug_tuple("Completion").field(value).finish(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use super::*;

  #[test]
  fn test_first_completion_wins() {
    let cell = Completion::new();
    assert!(cell.complete(1));
    assert!(!cell.complete(2));
    assert_eq!(cell.get_now(), Some(1));
  }

  #[test]
  fn test_listeners_run_once() {
    let cell = Completion::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let before = Arc::clone(&calls);
    cell.on_complete(move |v: &u32| {
      assert_eq!(*v, 7);
      before.fetch_add(1, Ordering::SeqCst);
    });
    cell.complete(7);
    cell.complete(8);

    let after = Arc::clone(&calls);
    cell.on_complete(move |v: &u32| {
      assert_eq!(*v, 7);
      after.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_listener_may_reenter() {
    let cell = Arc::new(Completion::new());
    let inner = Arc::clone(&cell);
    cell.on_complete(move |_: &u8| {
      assert!(inner.is_done());
      assert_eq!(inner.get_now(), Some(3));
    });
    cell.complete(3);
  }

  #[test]
  fn test_wait_timeout_across_threads() {
    let cell = Arc::new(Completion::new());
    let writer = Arc::clone(&cell);
    let handle = std::thread::spawn(move || writer.complete("done"));
    assert_eq!(cell.wait_timeout(Duration::from_secs(5)), Some("done"));
    handle.join().unwrap();
  }

  #[test]
  fn test_wait_timeout_expires() {
    let cell: Completion<u8> = Completion::new();
    assert_eq!(cell.wait_timeout(Duration::from_millis(5)), None);
  }
}
