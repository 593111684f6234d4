//! Insertion-ordered pool registry.
//!
//! Load balancing breaks ties by registration order, so iteration order
//! must be deterministic: ids are kept in a `Vec`, workers in a lookup map.

use std::collections::HashMap;
use std::sync::Arc;

use rinzler_core::WorkerId;

use crate::worker::Worker;

#[derive(Default)]
pub struct Registry {
    order: Vec<WorkerId>,
    workers: HashMap<WorkerId, Arc<Worker>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-registering an id keeps its original position.
    pub fn insert(&mut self, id: WorkerId, worker: Arc<Worker>) {
        if self.workers.insert(id.clone(), worker).is_none() {
            self.order.push(id);
        }
    }

    pub fn remove(&mut self, id: &WorkerId) -> Option<Arc<Worker>> {
        let worker = self.workers.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(worker)
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Arc<Worker>> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Workers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&WorkerId, &Arc<Worker>)> {
        self.order
            .iter()
            .filter_map(|id| self.workers.get(id).map(|worker| (id, worker)))
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<WorkerId> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rinzler_runtime::{ManualSpawner, Routines};

    fn worker(spawner: &ManualSpawner) -> Arc<Worker> {
        Worker::spawn(spawner, &Routines::new(Ok), None).unwrap()
    }

    #[tokio::test]
    async fn iteration_follows_insertion_order() {
        let spawner = ManualSpawner::new();
        let mut registry = Registry::new();
        let workers: Vec<_> = (0..4).map(|_| worker(&spawner)).collect();
        for w in &workers {
            registry.insert(w.id().clone(), w.clone());
        }

        registry.remove(workers[1].id());
        let ids: Vec<_> = registry.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                workers[0].id().clone(),
                workers[2].id().clone(),
                workers[3].id().clone()
            ]
        );
        assert_eq!(registry.ids(), ids);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn reinsert_keeps_position() {
        let spawner = ManualSpawner::new();
        let mut registry = Registry::new();
        let a = worker(&spawner);
        let b = worker(&spawner);
        registry.insert(a.id().clone(), a.clone());
        registry.insert(b.id().clone(), b.clone());
        registry.insert(a.id().clone(), a.clone());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids()[0], *a.id());
    }

    #[tokio::test]
    async fn remove_missing_is_none() {
        let spawner = ManualSpawner::new();
        let mut registry = Registry::new();
        let a = worker(&spawner);
        assert!(registry.remove(a.id()).is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains(a.id()));
        assert!(registry.get(a.id()).is_none());
    }
}
