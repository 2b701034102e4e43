//! Thread to core pinning.

use crate::error::AffinityError;
use core_affinity::CoreId;
use std::sync::OnceLock;

// The OS reports the mask of the calling thread, so it is captured once, before anything is pinned.
static PROCESS_CORES: OnceLock<Vec<usize>> = OnceLock::new();

/// Ids of the cores this process may run on, in the order the OS reports them.
pub fn available_cores() -> Result<&'static [usize], AffinityError> {
    let cores = PROCESS_CORES.get_or_init(|| {
        core_affinity::get_core_ids()
            .map(|ids| ids.into_iter().map(|c| c.id).collect())
            .unwrap_or_default()
    });
    if cores.is_empty() {
        return Err(AffinityError::NoCoreList);
    }
    Ok(cores)
}

/// Fail unless every id in `core_ids` is available to this process.
pub fn check_available(core_ids: &[usize]) -> Result<(), AffinityError> {
    let cores = available_cores()?;
    match core_ids.iter().find(|id| !cores.contains(id)) {
        Some(&id) => Err(AffinityError::Unavailable(id)),
        None => Ok(()),
    }
}

/// Restrict the calling thread to `core_id`.
pub fn bind(core_id: usize) -> Result<(), AffinityError> {
    check_available(&[core_id])?;
    if !core_affinity::set_for_current(CoreId { id: core_id }) {
        return Err(AffinityError::BindFailed(core_id));
    }
    debug!(
        "thread {:?} bound to core {}",
        std::thread::current().name(),
        core_id
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_bind_first_available() {
        let first = available_cores().unwrap()[0];
        thread::spawn(move || bind(first)).join().unwrap().unwrap();
    }

    #[test]
    fn test_bind_out_of_range() {
        let res = thread::spawn(|| bind(usize::MAX)).join().unwrap();
        assert_eq!(res, Err(AffinityError::Unavailable(usize::MAX)));
    }

    #[test]
    fn test_check_available() {
        let cores = available_cores().unwrap().to_vec();
        assert_eq!(check_available(&cores), Ok(()));
        assert_eq!(
            check_available(&[cores[0], usize::MAX]),
            Err(AffinityError::Unavailable(usize::MAX))
        );
    }
}
