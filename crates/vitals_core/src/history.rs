//! Histórico limitado de leituras, mais recente primeiro.

use crate::types::Reading;
use std::collections::VecDeque;

/// Capacidade padrão do histórico.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Buffer de capacidade fixa. Inserção sempre na frente; ao exceder a
/// capacidade a entrada mais antiga (no fim) é descartada.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Cria um buffer vazio. Capacidade zero é tratada como 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insere na frente; retorna a leitura descartada, se houver.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        self.entries.push_front(reading);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Leitura mais recente.
    pub fn latest(&self) -> Option<&Reading> {
        self.entries.front()
    }

    /// Itera do mais recente para o mais antigo.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.entries.iter()
    }

    /// Cópia do conteúdo para publicação em snapshot.
    pub fn to_vec(&self) -> Vec<Reading> {
        self.entries.iter().copied().collect()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(n: u64) -> Reading {
        Reading::new(70, 98, 36.5, n)
    }

    #[test]
    fn starts_empty() {
        let h = HistoryBuffer::default();
        assert!(h.is_empty());
        assert_eq!(h.capacity(), DEFAULT_HISTORY_CAPACITY);
        assert!(h.latest().is_none());
    }

    #[test]
    fn newest_first() {
        let mut h = HistoryBuffer::default();
        for n in 1..=3 {
            h.push(reading(n));
        }
        let stamps: Vec<_> = h.iter().map(|r| r.timestamp_ms()).collect();
        assert_eq!(stamps, [3, 2, 1]);
        assert_eq!(h.latest().map(|r| r.timestamp_ms()), Some(3));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut h = HistoryBuffer::default();
        let mut evicted = Vec::new();
        for n in 1..=51 {
            if let Some(old) = h.push(reading(n)) {
                evicted.push(old.timestamp_ms());
            }
        }

        assert_eq!(h.len(), 50);
        assert_eq!(evicted, [1]);
        let stamps: Vec<_> = h.to_vec().iter().map(|r| r.timestamp_ms()).collect();
        let expected: Vec<u64> = (2..=51).rev().collect();
        assert_eq!(stamps, expected);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut h = HistoryBuffer::new(3);
        for n in 0..100 {
            h.push(reading(n));
            assert!(h.len() <= 3);
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut h = HistoryBuffer::new(0);
        h.push(reading(1));
        h.push(reading(2));
        assert_eq!(h.len(), 1);
        assert_eq!(h.latest().map(|r| r.timestamp_ms()), Some(2));
    }
}
