//! Lookup throughput benchmark for an RCU hash table
//!
//! Reader threads, each pinned to a core of its own, look keys up in a shared table as fast as
//! they can while one pinned mutator thread keeps inserting and removing a batch of keys. Once
//! per wall-clock second the per reader deltas of hits and misses are printed; a run ends with
//! the per second averages.
//!
//! The table, `RcuHashMap`, keeps readers lock-free: they only enter a read-side critical section
//! of `HazardEpoch`, a practical version of the
//! [`Hazard Pointers`](http://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf) scheme.
//! Removed entries are handed to the epoch and freed once no reader can still hold them. A
//! `SpinRwLock` guarded `HashMap` is provided as a baseline backend.
//!
//! ```no_run
//! use rcu_lookup_bench::cancel::CancellationToken;
//! use rcu_lookup_bench::config::BoundedConfig;
//! use rcu_lookup_bench::run;
//!
//! let config = BoundedConfig::new(vec![0, 1, 2], 5, 3);
//! let summary = run::run_bounded(&config, &CancellationToken::new(), &mut std::io::stdout()).unwrap();
//! assert_eq!(summary.avg_total, summary.avg_misses + summary.avg_hits);
//! ```

mod hazard_pointer;
pub mod util;
pub mod error;
pub mod hazard_epoch;
pub mod spin_lock;
pub mod spin_rwlock;
pub mod rcu_map;
pub mod table;
pub mod counters;
pub mod affinity;
pub mod cancel;
pub mod config;
pub mod worker;
pub mod mutator;
pub mod stats;
pub mod run;
pub mod cli;

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;
