//! Randomized admission-gate property tests

use proptest::prelude::*;
use savefs::{Error, FixedClock, OpenMode, RamFlash, Storage, BLOCK_SIZE, POOL_CAPACITY};

proptest! {
    /// Any open/close sequence that stays within capacity never sees
    /// `PoolExhausted`; the moment capacity is exceeded, it always does.
    #[test]
    fn open_within_capacity_never_exhausts(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut s = Storage::init(
            RamFlash::new(64 * BLOCK_SIZE),
            FixedClock(1_700_000_000),
        ).unwrap();

        let mut open = Vec::new();
        let mut serial = 0u32;

        for want_open in ops {
            if want_open {
                serial += 1;
                let path = format!("f{}", serial % 4);
                let result = s.open(&path, OpenMode::Write, false);
                if open.len() < POOL_CAPACITY {
                    let handle = result.unwrap();
                    open.push(handle);
                } else {
                    prop_assert!(matches!(result, Err(Error::PoolExhausted)));
                }
            } else if let Some(handle) = open.pop() {
                s.close(handle).unwrap();
            }
            prop_assert_eq!(s.open_handles(), open.len());
        }

        for handle in open {
            s.close(handle).unwrap();
        }
        prop_assert_eq!(s.open_handles(), 0);
    }

    /// The compression slot never has more than one owner, no matter how
    /// opens and closes interleave.
    #[test]
    fn compression_slot_single_owner(ops in prop::collection::vec(any::<(bool, bool)>(), 1..200)) {
        let mut s = Storage::init(
            RamFlash::new(64 * BLOCK_SIZE),
            FixedClock(1_700_000_000),
        ).unwrap();

        let mut open: Vec<(savefs::FileHandle, bool)> = Vec::new();
        let mut serial = 0u32;

        for (want_open, compressed) in ops {
            if want_open {
                serial += 1;
                let path = format!("f{}", serial % 4);
                let result = s.open(&path, OpenMode::Write, compressed);
                let owner_exists = open.iter().any(|&(_, c)| c);

                if open.len() == POOL_CAPACITY {
                    prop_assert!(result.is_err());
                } else if compressed && owner_exists {
                    prop_assert!(matches!(result, Err(Error::CompressionBusy(_))));
                } else {
                    open.push((result.unwrap(), compressed));
                }
            } else if let Some((handle, _)) = open.pop() {
                s.close(handle).unwrap();
            }

            let owners = open.iter().filter(|&&(_, c)| c).count();
            prop_assert!(owners <= 1);
        }
    }
}
