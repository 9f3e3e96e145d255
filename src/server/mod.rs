/// Event-driven server front end.
///
/// - event_loop: single readiness-polling thread owning every socket
/// - connection: per-socket state (buffers, keep-alive, pipeline queue)
/// - worker_pool: threads running request handlers off the loop thread
pub mod connection;
pub mod event_loop;
pub mod worker_pool;
