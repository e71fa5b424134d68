use pocket_stream::Session;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    // One generation at a time; requests queue on the lock
    pub session: Arc<Mutex<Session>>,
    pub sample_rate: u32,
}

impl AppState {
    pub fn new(session: Session) -> Self {
        let sample_rate = session.config().sample_rate;
        Self {
            session: Arc::new(Mutex::new(session)),
            sample_rate,
        }
    }
}
