/// Runs an undo action when dropped, unless the operation it guards was
/// committed first.
pub(crate) struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    pub(crate) fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    /// Keeps the work done so far; the undo action is dropped unrun.
    pub(crate) fn commit(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}
