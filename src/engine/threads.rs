//! Thread bookkeeping
//!
//! Threads exist only for the duration of one run; the collection is
//! cleared on session close. The focus thread is the one inspection
//! commands target when no explicit thread is named.

use std::collections::BTreeMap;

use crate::common::{Error, Result};

/// One debuggee thread as the user sees it
#[derive(Debug, Clone)]
pub struct Thread {
    id: i64,
    name: String,
    stopped: bool,
    selected_frame: usize,
}

impl Thread {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stopped: false,
            selected_frame: 0,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn selected_stack_frame(&self) -> usize {
        self.selected_frame
    }

    pub fn set_selected_stack_frame(&mut self, index: usize) {
        self.selected_frame = index;
    }

    pub fn clear_selected_stack_frame(&mut self) {
        self.selected_frame = 0;
    }
}

/// The set of live threads plus the focus thread
#[derive(Debug, Default)]
pub struct ThreadCollection {
    threads: BTreeMap<i64, Thread>,
    focus: Option<i64>,
}

impl ThreadCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&mut self, id: i64, name: impl Into<String>) {
        self.threads.entry(id).or_insert_with(|| Thread::new(id, name));
    }

    pub fn remove_thread(&mut self, id: i64) {
        self.threads.remove(&id);
        if self.focus == Some(id) {
            self.focus = None;
        }
    }

    /// Replace the thread set with the adapter's list
    ///
    /// Stopped state and frame selection carry over for ids that match;
    /// names always refresh. Focus survives if its thread does.
    pub fn update_threads(&mut self, list: &[crate::dap::Thread]) {
        let mut next = BTreeMap::new();
        for t in list {
            let mut thread = match self.threads.remove(&t.id) {
                Some(existing) => existing,
                None => Thread::new(t.id, t.name.clone()),
            };
            thread.name = t.name.clone();
            next.insert(t.id, thread);
        }
        self.threads = next;
        if let Some(focus) = self.focus {
            if !self.threads.contains_key(&focus) {
                self.focus = None;
            }
        }
    }

    pub fn get_thread_by_id(&self, id: i64) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn get_thread_by_id_mut(&mut self, id: i64) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    /// All threads, ascending by id
    pub fn all_threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn mark_thread_running(&mut self, id: i64) {
        if let Some(t) = self.threads.get_mut(&id) {
            t.stopped = false;
            t.clear_selected_stack_frame();
        }
    }

    pub fn mark_all_threads_running(&mut self) {
        for t in self.threads.values_mut() {
            t.stopped = false;
            t.clear_selected_stack_frame();
        }
    }

    pub fn mark_thread_stopped(&mut self, id: i64) {
        if let Some(t) = self.threads.get_mut(&id) {
            if !t.stopped {
                t.clear_selected_stack_frame();
            }
            t.stopped = true;
        }
    }

    pub fn mark_all_threads_stopped(&mut self) {
        for t in self.threads.values_mut() {
            if !t.stopped {
                t.clear_selected_stack_frame();
            }
            t.stopped = true;
        }
    }

    pub fn all_threads_running(&self) -> bool {
        self.threads.values().all(|t| !t.stopped)
    }

    pub fn all_threads_stopped(&self) -> bool {
        self.threads.values().all(|t| t.stopped)
    }

    /// Any stopped thread, lowest id first
    pub fn first_stopped_thread(&self) -> Option<&Thread> {
        self.threads.values().find(|t| t.stopped)
    }

    pub fn set_focus_thread(&mut self, id: i64) -> Result<()> {
        if !self.threads.contains_key(&id) {
            return Err(Error::ThreadNotFound(id));
        }
        self.focus = Some(id);
        Ok(())
    }

    pub fn focus_thread(&self) -> Option<&Thread> {
        self.focus.and_then(|id| self.threads.get(&id))
    }

    pub fn focus_thread_id(&self) -> Option<i64> {
        self.focus
    }

    pub fn clear(&mut self) {
        self.threads.clear();
        self.focus = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dap_thread(id: i64, name: &str) -> crate::dap::Thread {
        crate::dap::Thread {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn marking_running_resets_frame_selection() {
        let mut threads = ThreadCollection::new();
        threads.add_thread(1, "main");
        threads.mark_thread_stopped(1);
        threads
            .get_thread_by_id_mut(1)
            .unwrap()
            .set_selected_stack_frame(4);

        threads.mark_thread_running(1);
        let t = threads.get_thread_by_id(1).unwrap();
        assert!(!t.is_stopped());
        assert_eq!(t.selected_stack_frame(), 0);
    }

    #[test]
    fn stopping_from_running_clears_frame_selection() {
        let mut threads = ThreadCollection::new();
        threads.add_thread(1, "main");
        threads.mark_thread_stopped(1);
        threads
            .get_thread_by_id_mut(1)
            .unwrap()
            .set_selected_stack_frame(2);

        // A second stop without an intervening run keeps the selection.
        threads.mark_thread_stopped(1);
        assert_eq!(
            threads.get_thread_by_id(1).unwrap().selected_stack_frame(),
            2
        );

        threads.mark_thread_running(1);
        threads.mark_thread_stopped(1);
        assert_eq!(
            threads.get_thread_by_id(1).unwrap().selected_stack_frame(),
            0
        );
    }

    #[test]
    fn update_threads_preserves_state_for_matching_ids() {
        let mut threads = ThreadCollection::new();
        threads.add_thread(1, "old-name");
        threads.add_thread(2, "worker");
        threads.mark_thread_stopped(1);
        threads.set_focus_thread(1).unwrap();

        threads.update_threads(&[dap_thread(1, "main"), dap_thread(3, "io")]);

        let t1 = threads.get_thread_by_id(1).unwrap();
        assert_eq!(t1.name(), "main");
        assert!(t1.is_stopped());
        assert!(threads.get_thread_by_id(2).is_none());
        assert!(!threads.get_thread_by_id(3).unwrap().is_stopped());
        assert_eq!(threads.focus_thread_id(), Some(1));
    }

    #[test]
    fn focus_cleared_when_its_thread_disappears() {
        let mut threads = ThreadCollection::new();
        threads.add_thread(5, "main");
        threads.set_focus_thread(5).unwrap();
        threads.update_threads(&[dap_thread(6, "other")]);
        assert_eq!(threads.focus_thread_id(), None);
    }

    #[test]
    fn first_stopped_thread_uses_ascending_id_order() {
        let mut threads = ThreadCollection::new();
        threads.add_thread(9, "c");
        threads.add_thread(4, "b");
        threads.add_thread(2, "a");
        threads.mark_thread_stopped(9);
        threads.mark_thread_stopped(4);

        assert_eq!(threads.first_stopped_thread().unwrap().id(), 4);
    }

    #[test]
    fn focus_requires_an_existing_thread() {
        let mut threads = ThreadCollection::new();
        assert!(matches!(
            threads.set_focus_thread(1),
            Err(Error::ThreadNotFound(1))
        ));
    }

    #[test]
    fn empty_collection_counts_as_all_running() {
        let threads = ThreadCollection::new();
        assert!(threads.all_threads_running());
        assert!(threads.all_threads_stopped());
    }
}
