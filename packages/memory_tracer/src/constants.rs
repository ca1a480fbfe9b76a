// A poisoned lock means a thread panicked while updating allocation records, so the records
// can no longer be trusted and there is nothing sensible left to report (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - allocation records \
    are in an unknown state and cannot be reported on";
