use std::thread::JoinHandle;
use std::time::Duration;

use eds::Worker;

/// Run the worker loop until the peer thread is finished.
pub fn drive<U: Default, S, T>(w: &mut Worker<'_, U, S>, peer: &JoinHandle<T>) {
    while !peer.is_finished() {
        w.poll_once(Some(Duration::from_millis(10))).unwrap();
        assert!(w.interest_is_consistent());
    }
}
