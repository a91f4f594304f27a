//! # Session Timer
//!
//! Enforces the maximum recording duration. The timer runs on the owning
//! actor's context, so when it fires the callback gets `&mut` access to the
//! actor like any other message: expiry and an explicit done signal can never
//! interleave, and whichever arrives second finds the session already finalizing.

use actix::{Actor, AsyncContext, SpawnHandle};
use std::time::Duration;

#[derive(Debug)]
pub struct SessionTimer {
    max_duration: Duration,
    handle: Option<SpawnHandle>,
}

impl SessionTimer {
    pub fn new(max_duration: Duration) -> Self {
        Self { max_duration, handle: None }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Schedule `on_expiry` once, `max_duration` from now. Re-arming replaces
    /// any pending expiry.
    pub fn arm<A, F>(&mut self, ctx: &mut A::Context, on_expiry: F)
    where
        A: Actor,
        A::Context: AsyncContext<A>,
        F: FnOnce(&mut A, &mut A::Context) + 'static,
    {
        if let Some(previous) = self.handle.take() {
            ctx.cancel_future(previous);
        }
        self.handle = Some(ctx.run_later(self.max_duration, on_expiry));
    }

    /// Cancel a pending expiry. Returns true if one was pending.
    pub fn cancel<A>(&mut self, ctx: &mut A::Context) -> bool
    where
        A: Actor,
        A::Context: AsyncContext<A>,
    {
        match self.handle.take() {
            Some(handle) => ctx.cancel_future(handle),
            None => false,
        }
    }

    /// Forget the handle after the timer fired.
    pub fn expired(&mut self) {
        self.handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Context, Handler, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        timer: SessionTimer,
        fired: Arc<AtomicUsize>,
    }

    impl Actor for Probe {
        type Context = Context<Self>;

        fn started(&mut self, ctx: &mut Self::Context) {
            self.timer.arm::<Self, _>(ctx, |act, _ctx| {
                act.timer.expired();
                act.fired.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    #[derive(Message)]
    #[rtype(result = "bool")]
    struct Cancel;

    impl Handler<Cancel> for Probe {
        type Result = bool;

        fn handle(&mut self, _msg: Cancel, ctx: &mut Self::Context) -> bool {
            self.timer.cancel::<Self>(ctx)
        }
    }

    #[actix_web::test]
    async fn test_timer_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let _addr = Probe {
            timer: SessionTimer::new(Duration::from_millis(20)),
            fired: fired.clone(),
        }
        .start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let addr = Probe {
            timer: SessionTimer::new(Duration::from_millis(100)),
            fired: fired.clone(),
        }
        .start();

        assert!(addr.send(Cancel).await.unwrap());
        // Second cancel finds nothing pending
        assert!(!addr.send(Cancel).await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
