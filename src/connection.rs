//! Codec-facing connection driver.
//!
//! [`Connection`] owns one codec and one engine and drives them to
//! completion: every action of request *i* is fully written and flushed
//! before the next message of request *i+1* is taken from the codec, so
//! the external ordering guarantee holds by construction.
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::codec::{Action, Codec, HttpMessage};
use crate::log::debug;
use crate::page::{PageEngine, PageHooks};
use crate::rest::{RestEngine, RestHooks};

/// A per-connection protocol engine, as seen by the driver.
pub trait Engine {
    /// Handle one message; the returned actions must be written before
    /// the next message is delivered.
    fn recv(&mut self, msg: HttpMessage) -> Vec<Action>;

    /// Connection teardown; runs the request-context cleanup exactly
    /// once.
    fn inactivate(&mut self);

    fn is_closed(&self) -> bool;
}

impl<H: PageHooks> Engine for PageEngine<H> {
    fn recv(&mut self, msg: HttpMessage) -> Vec<Action> {
        PageEngine::recv(self, msg)
    }

    fn inactivate(&mut self) {
        PageEngine::inactivate(self)
    }

    fn is_closed(&self) -> bool {
        PageEngine::is_closed(self)
    }
}

impl<H: RestHooks> Engine for RestEngine<H> {
    fn recv(&mut self, msg: HttpMessage) -> Vec<Action> {
        RestEngine::recv(self, msg)
    }

    fn inactivate(&mut self) {
        RestEngine::inactivate(self)
    }

    fn is_closed(&self) -> bool {
        RestEngine::is_closed(self)
    }
}

/// Future driving one connection until the engine closes it or the peer
/// goes away.
///
/// Transport errors raised while a closing response is being written are
/// swallowed: the connection is already gone and the error response was
/// best-effort.
#[derive(Debug)]
pub struct Connection<C, E> {
    codec: C,
    engine: E,
    pending: VecDeque<Action>,
    closing: bool,
    done: bool,
}

impl<C, E> Connection<C, E>
where
    C: Codec,
    E: Engine,
{
    pub fn new(codec: C, engine: E) -> Self {
        Self {
            codec,
            engine,
            pending: VecDeque::new(),
            closing: false,
            done: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn finish(&mut self, result: Result<(), C::Error>) -> Poll<Result<(), C::Error>> {
        self.engine.inactivate();
        self.done = true;
        // an error while an error response was in flight is swallowed
        if self.closing {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(result)
        }
    }
}

impl<C, E> Future for Connection<C, E>
where
    C: Codec + Unpin,
    E: Engine + Unpin,
{
    type Output = Result<(), C::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        if me.done {
            return Poll::Ready(Ok(()));
        }
        loop {
            // finish any in-flight write before anything else
            match me.codec.poll_flush(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return me.finish(Err(err)),
                Poll::Pending => return Poll::Pending,
            }

            if let Some(action) = me.pending.pop_front() {
                if action.is_closing() {
                    me.closing = true;
                }
                if let Err(err) = me.codec.start_send(action) {
                    return me.finish(Err(err));
                }
                continue;
            }

            if me.closing || me.engine.is_closed() {
                debug!("connection closing");
                return me.finish(Ok(()));
            }

            match me.codec.poll_recv(cx) {
                Poll::Ready(Some(Ok(msg))) => {
                    me.pending.extend(me.engine.recv(msg));
                }
                Poll::Ready(Some(Err(err))) => return me.finish(Err(err)),
                Poll::Ready(None) => return me.finish(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
