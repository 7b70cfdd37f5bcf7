//! In-memory transports for exercising the controller without a network.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use chatline_stream::{
    BoxFuture, ByteStream, ChatRequest, Transport, TransportError, TransportResponse,
    TransportResult,
};
use futures::channel::mpsc;
use futures::stream;
use parking_lot::Mutex;

pub(crate) const HELLO_LINES: [&str; 3] = [
    "data: {\"id\":\"m1\",\"content\":\"Hello\",\"done\":false}\n",
    "data: {\"id\":\"m1\",\"content\":\"\",\"done\":true}\n",
    "data: [DONE]\n",
];

pub(crate) enum Reply {
    Respond {
        status: u16,
        body: Option<ByteStream>,
    },
    Fail(TransportError),
}

/// Answers each request with the next scripted reply and records what was sent.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn open<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<TransportResponse>> {
        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front();
        Box::pin(async move {
            match reply {
                Some(Reply::Respond { status, body }) => Ok(TransportResponse::new(status, body)),
                Some(Reply::Fail(error)) => Err(error),
                None => Err(TransportError::Stream {
                    stage: "scripted-transport",
                    message: "no reply scripted".to_string(),
                }),
            }
        })
    }
}

pub(crate) fn stream_reply(chunks: &[&'static str]) -> Reply {
    let chunks = chunks
        .iter()
        .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
        .collect::<Vec<TransportResult<Bytes>>>();
    Reply::Respond {
        status: 200,
        body: Some(Box::pin(stream::iter(chunks))),
    }
}

/// Reply whose body only yields what the test pushes into the sender.
pub(crate) fn gated_reply() -> (mpsc::UnboundedSender<TransportResult<Bytes>>, Reply) {
    let (sender, receiver) = mpsc::unbounded();
    let reply = Reply::Respond {
        status: 200,
        body: Some(Box::pin(receiver)),
    };
    (sender, reply)
}

pub(crate) fn push(sender: &mpsc::UnboundedSender<TransportResult<Bytes>>, line: &'static str) {
    sender
        .unbounded_send(Ok(Bytes::from_static(line.as_bytes())))
        .expect("exchange still reading");
}
