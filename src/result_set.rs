use crate::error::TaskFailure;

/// The outcome recorded for a single task index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T, E> {
  /// The task never settled while the run was observing it (only after a stop).
  Unset,
  Success(T),
  Failure(TaskFailure<E>),
}

impl<T, E> Slot<T, E> {
  pub fn is_unset(&self) -> bool {
    matches!(self, Slot::Unset)
  }

  /// Borrowing view as a `Result`, `None` when unset.
  pub fn as_result(&self) -> Option<Result<&T, &TaskFailure<E>>> {
    match self {
      Slot::Unset => None,
      Slot::Success(v) => Some(Ok(v)),
      Slot::Failure(f) => Some(Err(f)),
    }
  }
}

/// Index-ordered outcomes of one run.
///
/// Holds one slot per submitted task. Each slot is written at most once, and the
/// success and error index lists are kept sorted and never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet<T, E> {
  slots: Vec<Slot<T, E>>,
  success_indices: Vec<usize>,
  error_indices: Vec<usize>,
}

impl<T, E> ResultSet<T, E> {
  pub(crate) fn new(len: usize) -> Self {
    Self {
      slots: (0..len).map(|_| Slot::Unset).collect(),
      success_indices: Vec::new(),
      error_indices: Vec::new(),
    }
  }

  /// Records a success. Returns `false` (and writes nothing) if the index is out
  /// of range or already settled.
  pub(crate) fn set_success(&mut self, index: usize, value: T) -> bool {
    if !self.is_writable(index) {
      return false;
    }
    insert_sorted(&mut self.success_indices, index);
    self.slots[index] = Slot::Success(value);
    true
  }

  /// Records a failure. Same write-once rules as `set_success`.
  pub(crate) fn set_error(&mut self, index: usize, failure: TaskFailure<E>) -> bool {
    if !self.is_writable(index) {
      return false;
    }
    insert_sorted(&mut self.error_indices, index);
    self.slots[index] = Slot::Failure(failure);
    true
  }

  pub(crate) fn record(&mut self, index: usize, outcome: Result<T, TaskFailure<E>>) -> bool {
    match outcome {
      Ok(value) => self.set_success(index, value),
      Err(failure) => self.set_error(index, failure),
    }
  }

  fn is_writable(&self, index: usize) -> bool {
    self.slots.get(index).is_some_and(Slot::is_unset)
  }

  /// Number of submitted tasks.
  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Slot<T, E>> {
    self.slots.get(index)
  }

  pub fn slots(&self) -> &[Slot<T, E>] {
    &self.slots
  }

  pub fn into_slots(self) -> Vec<Slot<T, E>> {
    self.slots
  }

  pub fn success_indices(&self) -> &[usize] {
    &self.success_indices
  }

  pub fn error_indices(&self) -> &[usize] {
    &self.error_indices
  }

  /// Indices of tasks that never settled during the run, ascending.
  pub fn unset_indices(&self) -> Vec<usize> {
    self
      .slots
      .iter()
      .enumerate()
      .filter(|(_, slot)| slot.is_unset())
      .map(|(i, _)| i)
      .collect()
  }

  /// Success values in ascending index order.
  pub fn successes(&self) -> Vec<&T> {
    self
      .success_indices
      .iter()
      .filter_map(|&i| match &self.slots[i] {
        Slot::Success(v) => Some(v),
        _ => None,
      })
      .collect()
  }

  /// Failures in ascending index order.
  pub fn errors(&self) -> Vec<&TaskFailure<E>> {
    self
      .error_indices
      .iter()
      .filter_map(|&i| match &self.slots[i] {
        Slot::Failure(f) => Some(f),
        _ => None,
      })
      .collect()
  }

  pub fn success_count(&self) -> usize {
    self.success_indices.len()
  }

  pub fn error_count(&self) -> usize {
    self.error_indices.len()
  }

  /// Tasks that were never admitted or never observed settling.
  pub fn stop_count(&self) -> usize {
    self.len() - self.success_count() - self.error_count()
  }

  /// `true` iff every slot holds a success. Vacuously true for an empty set.
  pub fn all_succeed(&self) -> bool {
    self.success_count() == self.len()
  }
}

fn insert_sorted(indices: &mut Vec<usize>, index: usize) {
  if let Err(pos) = indices.binary_search(&index) {
    indices.insert(pos, index);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_result_set_is_all_unset() {
    let results = ResultSet::<u32, String>::new(3);
    assert_eq!(results.len(), 3);
    assert_eq!(results.stop_count(), 3);
    assert_eq!(results.unset_indices(), vec![0, 1, 2]);
    assert!(!results.all_succeed());
  }

  #[test]
  fn test_out_of_order_writes_produce_sorted_views() {
    let mut results = ResultSet::<u32, String>::new(12);
    // Settle in scrambled order, including two-digit indices.
    for i in [10, 2, 7, 0, 11] {
      assert!(results.set_success(i, i as u32 * 10));
    }
    for i in [9, 1] {
      assert!(results.set_error(i, TaskFailure::Failed(format!("e{i}"))));
    }

    assert_eq!(results.success_indices(), &[0, 2, 7, 10, 11]);
    assert_eq!(results.error_indices(), &[1, 9]);
    assert_eq!(results.successes(), vec![&0, &20, &70, &100, &110]);
    assert_eq!(
      results.errors(),
      vec![&TaskFailure::Failed("e1".to_string()), &TaskFailure::Failed("e9".to_string())]
    );
    assert_eq!(results.success_count(), 5);
    assert_eq!(results.error_count(), 2);
    assert_eq!(results.stop_count(), 5);
  }

  #[test]
  fn test_slot_written_at_most_once() {
    let mut results = ResultSet::<u32, String>::new(2);
    assert!(results.set_success(0, 1));
    assert!(!results.set_error(0, TaskFailure::Failed("late".into())));
    assert!(!results.set_success(0, 2));
    assert!(!results.set_success(5, 2), "out-of-range index must be rejected");

    assert_eq!(results.get(0), Some(&Slot::Success(1)));
    assert_eq!(results.error_count(), 0);
    assert_eq!(results.success_indices(), &[0]);
  }

  #[test]
  fn test_all_succeed() {
    let mut results = ResultSet::<u32, String>::new(2);
    results.record(1, Ok(2));
    assert!(!results.all_succeed());
    results.record(0, Ok(1));
    assert!(results.all_succeed());
    assert!(ResultSet::<u32, String>::new(0).all_succeed());
  }

  #[test]
  fn test_slot_as_result() {
    let mut results = ResultSet::<u32, &str>::new(3);
    results.record(0, Ok(5));
    results.record(1, Err(TaskFailure::Panicked("boom".into())));
    assert_eq!(results.slots()[0].as_result(), Some(Ok(&5)));
    assert!(matches!(results.slots()[1].as_result(), Some(Err(TaskFailure::Panicked(_)))));
    assert_eq!(results.slots()[2].as_result(), None);
  }
}
