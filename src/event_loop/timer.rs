//! # Cola de Timers
//! src/event_loop/timer.rs
//!
//! Heap de timers ordenado por instante de disparo. No tiene thread propio:
//! el dueño (el event loop o un carrier de fibers) consulta `next_deadline()`
//! para saber cuánto puede esperar en su canal y luego drena los vencidos
//! con `pop_expired()`.
//!
//! Cada entrada sale del conjunto pendiente exactamente una vez: al dispararse
//! o al cancelarse.

use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// Identificador único de un timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Reserva el siguiente id. Los ids crecen con el orden de armado,
    /// por eso sirven para desempatar timers con el mismo instante.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TimerId(NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Entrada del heap: {instante de disparo, callback}
struct TimerEntry<T> {
    fire_at: Instant,
    id: TimerId,
    payload: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.id == other.id
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap es max-heap: invertimos para que salga el más próximo
impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Cola de timers de un solo dueño (no es thread-safe a propósito)
pub struct TimerQueue<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    /// Ids armados que aún no se dispararon ni se cancelaron
    pending: FxHashSet<TimerId>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: FxHashSet::default(),
        }
    }

    /// Arma un timer con un id reservado previamente
    pub fn arm(&mut self, id: TimerId, fire_at: Instant, payload: T) {
        self.pending.insert(id);
        self.heap.push(TimerEntry { fire_at, id, payload });
    }

    /// Arma un timer que vence dentro de `delay`
    pub fn arm_after(&mut self, delay: Duration, payload: T) -> TimerId {
        let id = TimerId::next();
        self.arm(id, Instant::now() + delay, payload);
        id
    }

    /// Cancela un timer pendiente.
    ///
    /// Retorna `false` si el timer ya se disparó o ya estaba cancelado.
    /// La entrada se descarta del heap de forma perezosa.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id)
    }

    /// Instante del próximo timer vivo, si hay alguno
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|entry| entry.fire_at)
    }

    /// Saca el próximo timer vencido en `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, T)> {
        self.discard_cancelled();
        match self.heap.peek() {
            Some(entry) if entry.fire_at <= now => {}
            _ => return None,
        }
        let entry = self.heap.pop()?;
        self.pending.remove(&entry.id);
        Some((entry.id, entry.payload))
    }

    /// Cantidad de timers vivos
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Vacía la cola devolviendo los payloads vivos en orden de disparo
    pub fn drain(&mut self) -> Vec<(TimerId, T)> {
        let mut drained = Vec::with_capacity(self.pending.len());
        while let Some(entry) = self.heap.pop() {
            if self.pending.remove(&entry.id) {
                drained.push((entry.id, entry.payload));
            }
        }
        drained
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains(&entry.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order_regardless_of_arming_order() {
        let mut queue = TimerQueue::new();
        let base = Instant::now();

        // d2 se arma primero, d1 después
        queue.arm(TimerId::next(), base + Duration::from_millis(200), "d2");
        queue.arm(TimerId::next(), base + Duration::from_millis(100), "d1");

        let later = base + Duration::from_secs(1);
        assert_eq!(queue.pop_expired(later).map(|(_, p)| p), Some("d1"));
        assert_eq!(queue.pop_expired(later).map(|(_, p)| p), Some("d2"));
        assert!(queue.pop_expired(later).is_none());
    }

    #[test]
    fn test_same_deadline_keeps_arming_order() {
        let mut queue = TimerQueue::new();
        let at = Instant::now();

        queue.arm(TimerId::next(), at, 1);
        queue.arm(TimerId::next(), at, 2);
        queue.arm(TimerId::next(), at, 3);

        let fired: Vec<_> = std::iter::from_fn(|| queue.pop_expired(at)).map(|(_, p)| p).collect();
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn test_not_expired_yet() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(TimerId::next(), now + Duration::from_secs(10), ());

        assert!(queue.pop_expired(now).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_cancel_removes_exactly_once() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let id = TimerId::next();
        queue.arm(id, now, "x");

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.pop_expired(now + Duration::from_secs(1)).is_none());
        assert!(queue.is_empty());
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let id = TimerId::next();
        queue.arm(id, now, "x");

        assert!(queue.pop_expired(now).is_some());
        assert!(!queue.cancel(id));
    }

    #[test]
    fn test_cancelled_head_does_not_hide_next_deadline() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let first = TimerId::next();
        queue.arm(first, now + Duration::from_millis(10), "a");
        queue.arm(TimerId::next(), now + Duration::from_millis(50), "b");

        queue.cancel(first);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_drain_returns_live_entries() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let dead = TimerId::next();
        queue.arm(dead, now, "dead");
        queue.arm(TimerId::next(), now + Duration::from_millis(5), "live");
        queue.cancel(dead);

        let drained: Vec<_> = queue.drain().into_iter().map(|(_, p)| p).collect();
        assert_eq!(drained, vec!["live"]);
        assert!(queue.is_empty());
    }
}
