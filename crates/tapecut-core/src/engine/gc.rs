//! Deferred deallocation for audio-thread drops
//!
//! `buffer_load` payloads travel into the engine as `basedrop::Owned`
//! allocations. When the audio thread is done with one, dropping it only
//! enqueues a pointer; the actual free happens on a background collector
//! thread where deallocation latency cannot cause dropouts.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Collection cadence; memory reclamation is not latency sensitive
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector is !Sync, so it lives on its own thread and only a
    // Handle comes back.
    thread::Builder::new()
        .name("tapecut-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("failed to hand back gc handle");

            log::info!("tapecut gc thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("failed to spawn tapecut gc thread");

    rx.recv().expect("failed to receive gc handle")
}

/// Get a handle for creating deferred-drop allocations
///
/// Initialises the global collector on first use. The handle is cheap to
/// clone and is valid for the life of the process.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
