//! The bounded subscriber pool, with two intrusive doubly-linked lists
//! (`unactive`, `pending`) threaded through it.
//!
//! Slots live in a `Vec`, freed slots are tracked on an explicit free
//! stack, and cross-slot links are plain indices guarded by a generation
//! counter per slot rather than raw pointers — reusing a stale
//! [`SubscriberHandle`] is a catchable error instead of undefined behavior.

use crate::{
  result::{EngineError, EngineResult},
  subscriber::{ListMembership, Subscriber, SubscriberHandle},
  token::Token,
};

struct Slot<E> {
  generation: u32,
  data: Option<Subscriber<E>>,
}

/// Which intrusive list an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
  /// Registered, no confirmable notification currently in flight for it.
  Unactive,
  /// Queued for the scheduler to dispatch a notification to.
  Pending,
}

/// A fixed-capacity pool of subscriber slots, addressable only through
/// generation-checked [`SubscriberHandle`]s, plus the two lists the
/// scheduler walks.
pub struct SubscriberRegistry<E> {
  slots: Vec<Slot<E>>,
  free: Vec<u32>,
  unactive_head: Option<u32>,
  unactive_tail: Option<u32>,
  pending_head: Option<u32>,
  pending_tail: Option<u32>,
  pending_len: usize,
}

impl<E> SubscriberRegistry<E> {
  pub fn new(capacity: usize) -> Self {
    let mut slots = Vec::with_capacity(capacity);
    let mut free = Vec::with_capacity(capacity);
    for i in (0..capacity as u32).rev() {
      slots.push(Slot {
        generation: 0,
        data: None,
      });
      free.push(i);
    }
    Self {
      slots,
      free,
      unactive_head: None,
      unactive_tail: None,
      pending_head: None,
      pending_tail: None,
      pending_len: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  pub fn in_use(&self) -> usize {
    self.slots.len() - self.free.len()
  }

  pub fn pending_len(&self) -> usize {
    self.pending_len
  }

  /// Allocates a slot and pushes it onto the unactive list's tail. Returns
  /// `None` when the pool is at capacity ("pool exhaustion"), which the
  /// caller reports to the requester rather than treating as an internal
  /// error.
  pub fn allocate(&mut self, endpoint: E, token: Token, url: String) -> Option<SubscriberHandle> {
    let index = self.free.pop()?;
    let slot = &mut self.slots[index as usize];
    let mut sub = Subscriber::new(endpoint, token, url);
    sub.membership = ListMembership::Unactive;
    slot.data = Some(sub);
    let handle = SubscriberHandle {
      index,
      generation: slot.generation,
    };
    self.push_back(ListKind::Unactive, index);
    Some(handle)
  }

  fn check(&self, handle: SubscriberHandle) -> EngineResult<usize> {
    let index = handle.index as usize;
    let slot = self
      .slots
      .get(index)
      .ok_or(EngineError::HandleOutOfRange(handle.index, self.slots.len()))?;
    if slot.generation != handle.generation || slot.data.is_none() {
      return Err(EngineError::HandleStale(handle));
    }
    Ok(index)
  }

  pub fn get(&self, handle: SubscriberHandle) -> EngineResult<&Subscriber<E>> {
    let index = self.check(handle)?;
    Ok(self.slots[index].data.as_ref().expect("checked above"))
  }

  pub fn get_mut(&mut self, handle: SubscriberHandle) -> EngineResult<&mut Subscriber<E>> {
    let index = self.check(handle)?;
    Ok(self.slots[index].data.as_mut().expect("checked above"))
  }

  pub fn unactive_head(&self) -> Option<SubscriberHandle> {
    self.unactive_head.map(|index| self.handle_of(index))
  }

  pub fn pending_head(&self) -> Option<SubscriberHandle> {
    self.pending_head.map(|index| self.handle_of(index))
  }

  fn handle_of(&self, index: u32) -> SubscriberHandle {
    SubscriberHandle {
      index,
      generation: self.slots[index as usize].generation,
    }
  }

  /// Snapshots a list's current members before a caller walks it with an
  /// operation (e.g. removal) that might mutate the list mid-walk: take
  /// every handle up front so a freed slot never stalls the walk.
  pub fn snapshot(&self, list: ListKind) -> Vec<SubscriberHandle> {
    let mut out = Vec::new();
    let mut cur = match list {
      ListKind::Unactive => self.unactive_head,
      ListKind::Pending => self.pending_head,
    };
    while let Some(index) = cur {
      out.push(self.handle_of(index));
      cur = self.slots[index as usize]
        .data
        .as_ref()
        .expect("listed slot is occupied")
        .next;
    }
    out
  }

  /// Like [`Self::snapshot`] but filtered by a predicate, for the removal
  /// family's by-client/by-token/by-uri/by-mid queries, which must also
  /// search subscribers currently mid-transaction (detached from both
  /// lists).
  pub fn find_all(&self, mut pred: impl FnMut(&Subscriber<E>) -> bool) -> Vec<SubscriberHandle> {
    let mut out = Vec::new();
    for (index, slot) in self.slots.iter().enumerate() {
      if let Some(sub) = &slot.data {
        if pred(sub) {
          out.push(SubscriberHandle {
            index: index as u32,
            generation: slot.generation,
          });
        }
      }
    }
    out
  }

  fn list_heads_mut(&mut self, list: ListKind) -> (&mut Option<u32>, &mut Option<u32>) {
    match list {
      ListKind::Unactive => (&mut self.unactive_head, &mut self.unactive_tail),
      ListKind::Pending => (&mut self.pending_head, &mut self.pending_tail),
    }
  }

  fn push_back(&mut self, list: ListKind, index: u32) {
    let tail = match list {
      ListKind::Unactive => self.unactive_tail,
      ListKind::Pending => self.pending_tail,
    };
    {
      let sub = self.slots[index as usize].data.as_mut().expect("occupied");
      sub.prev = tail;
      sub.next = None;
      sub.membership = match list {
        ListKind::Unactive => ListMembership::Unactive,
        ListKind::Pending => ListMembership::Pending,
      };
    }
    if let Some(tail_index) = tail {
      self.slots[tail_index as usize]
        .data
        .as_mut()
        .expect("occupied")
        .next = Some(index);
    }
    let (head, tail_ref) = self.list_heads_mut(list);
    if head.is_none() {
      *head = Some(index);
    }
    *tail_ref = Some(index);
    if matches!(list, ListKind::Pending) {
      self.pending_len += 1;
    }
  }

  /// Unlinks `index` from whichever list it currently threads through,
  /// leaving its own `prev`/`next` untouched (the caller is expected to
  /// either re-link it elsewhere or detach it outright).
  fn unlink(&mut self, list: ListKind, index: u32) {
    let (prev, next) = {
      let sub = self.slots[index as usize].data.as_ref().expect("occupied");
      (sub.prev, sub.next)
    };
    match prev {
      Some(p) => {
        self.slots[p as usize].data.as_mut().expect("occupied").next = next;
      }
      None => {
        let (head, _) = self.list_heads_mut(list);
        *head = next;
      }
    }
    match next {
      Some(n) => {
        self.slots[n as usize].data.as_mut().expect("occupied").prev = prev;
      }
      None => {
        let (_, tail) = self.list_heads_mut(list);
        *tail = prev;
      }
    }
    if matches!(list, ListKind::Pending) {
      self.pending_len -= 1;
    }
  }

  /// Detaches a subscriber from its current list without relinking it
  /// elsewhere — used while a confirmable transaction is outstanding.
  pub fn detach(&mut self, handle: SubscriberHandle) -> EngineResult<()> {
    let index = self.check(handle)?;
    let membership = self.slots[index as usize]
      .data
      .as_ref()
      .expect("checked")
      .membership;
    match membership {
      ListMembership::Unactive => self.unlink(ListKind::Unactive, index),
      ListMembership::Pending => self.unlink(ListKind::Pending, index),
      ListMembership::Detached => {
        return Err(EngineError::InvalidTransition("detach: already detached"))
      }
    }
    self.slots[index as usize].data.as_mut().expect("checked").membership = ListMembership::Detached;
    Ok(())
  }

  pub fn move_to_pending(&mut self, handle: SubscriberHandle) -> EngineResult<()> {
    let index = self.check(handle)?;
    let membership = self.slots[index as usize]
      .data
      .as_ref()
      .expect("checked")
      .membership;
    if membership == ListMembership::Unactive {
      self.unlink(ListKind::Unactive, index);
    }
    if membership != ListMembership::Pending {
      self.push_back(ListKind::Pending, index);
    }
    Ok(())
  }

  pub fn move_to_unactive(&mut self, handle: SubscriberHandle) -> EngineResult<()> {
    let index = self.check(handle)?;
    let membership = self.slots[index as usize]
      .data
      .as_ref()
      .expect("checked")
      .membership;
    if membership == ListMembership::Pending {
      self.unlink(ListKind::Pending, index);
    }
    if membership != ListMembership::Unactive {
      self.push_back(ListKind::Unactive, index);
    }
    Ok(())
  }

  /// Frees a slot, dropping it from whichever list (if any) currently holds
  /// it and bumping the slot's generation so any outstanding handle to it
  /// is rejected by future lookups.
  pub fn free(&mut self, handle: SubscriberHandle) -> EngineResult<()> {
    let index = self.check(handle)?;
    let membership = self.slots[index as usize]
      .data
      .as_ref()
      .expect("checked")
      .membership;
    match membership {
      ListMembership::Unactive => self.unlink(ListKind::Unactive, index),
      ListMembership::Pending => self.unlink(ListKind::Pending, index),
      ListMembership::Detached => {}
    }
    let slot = &mut self.slots[index as usize];
    slot.data = None;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(index as u32);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn reg() -> SubscriberRegistry<u32> {
    SubscriberRegistry::new(4)
  }

  #[test]
  fn allocate_fails_past_capacity() {
    let mut r = reg();
    for i in 0..4 {
      assert!(r.allocate(i, Token::empty(), "/a".into()).is_some());
    }
    assert!(r.allocate(99, Token::empty(), "/a".into()).is_none());
    assert_eq!(r.in_use(), 4);
  }

  #[test]
  fn stale_handle_rejected_after_free_and_reuse() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    r.free(h1).unwrap();
    let h2 = r.allocate(2, Token::empty(), "/a".into()).unwrap();
    assert_eq!(h1.index, h2.index);
    assert_ne!(h1.generation, h2.generation);
    assert!(matches!(r.get(h1), Err(EngineError::HandleStale(_))));
    assert!(r.get(h2).is_ok());
  }

  #[test]
  fn unactive_list_preserves_insertion_order() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    let h2 = r.allocate(2, Token::empty(), "/b".into()).unwrap();
    let h3 = r.allocate(3, Token::empty(), "/c".into()).unwrap();
    assert_eq!(
      r.snapshot(ListKind::Unactive),
      vec![h1, h2, h3]
    );
  }

  #[test]
  fn move_to_pending_then_back_restores_tail_position() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    let h2 = r.allocate(2, Token::empty(), "/b".into()).unwrap();
    r.move_to_pending(h1).unwrap();
    assert_eq!(r.pending_len(), 1);
    assert_eq!(r.snapshot(ListKind::Unactive), vec![h2]);
    assert_eq!(r.snapshot(ListKind::Pending), vec![h1]);
    r.move_to_unactive(h1).unwrap();
    assert_eq!(r.pending_len(), 0);
    // h1 moves to the unactive tail, behind h2.
    assert_eq!(r.snapshot(ListKind::Unactive), vec![h2, h1]);
  }

  #[test]
  fn detach_removes_from_pending_without_relinking() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    r.move_to_pending(h1).unwrap();
    r.detach(h1).unwrap();
    assert_eq!(r.pending_len(), 0);
    assert_eq!(r.get(h1).unwrap().membership(), ListMembership::Detached);
  }

  #[test]
  fn snapshot_survives_mid_walk_free() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    let h2 = r.allocate(2, Token::empty(), "/b".into()).unwrap();
    let snapshot = r.snapshot(ListKind::Unactive);
    r.free(h1).unwrap();
    // the snapshot, taken before the free, still names h1; looking it up
    // now correctly reports it stale rather than aliasing h2's data.
    assert_eq!(snapshot, vec![h1, h2]);
    assert!(r.get(h1).is_err());
    assert!(r.get(h2).is_ok());
  }

  #[test]
  fn find_all_matches_detached_subscribers_too() {
    let mut r = reg();
    let h1 = r.allocate(1, Token::empty(), "/a".into()).unwrap();
    r.detach(h1).unwrap();
    let found = r.find_all(|s| s.endpoint == 1);
    assert_eq!(found, vec![h1]);
  }
}
