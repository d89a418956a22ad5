//! Deferred deallocation of sample buffers
//!
//! Track sequences hold their PCM in a `basedrop::Shared<SampleData>`. The
//! mixing thread clones that pointer for every quantum it mixes, and when a
//! sequence finishes the last reference is usually dropped on the mixing
//! thread. With `Shared<T>` the drop only enqueues the pointer; the memory is
//! freed on the `audio-gc` thread, away from the device write loop.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let data = Shared::new(&gc_handle(), SampleData::new(bytes, ByteOrder::Little, 1));
//! let for_engine = data.clone();
//! drop(data);
//! drop(for_engine); // queued for the collector, freed on the GC thread
//! ```

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// How often the collector thread reclaims queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it is created and owned here
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::info!("Sample buffer collector started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("failed to spawn audio-gc thread");

    rx.recv().expect("audio-gc thread exited before handing out its handle")
}

/// Handle for allocating `Shared<T>` sample buffers
///
/// The collector thread is started on first use.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_shared_clone_and_drop() {
        let data = Shared::new(&gc_handle(), vec![1i16, 2, 3]);
        let clone = data.clone();
        drop(data);
        assert_eq!(clone.len(), 3);
        drop(clone);
    }
}
