//! In-process transport doubles for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use super::{Transport, TransportError, TransportKind, TransportResult};
use crate::operation::{Operation, RawResult};

type Handler = Box<dyn Fn(&Operation, usize) -> TransportResult<RawResult> + Send + Sync>;

/// A transport answering from a closure; every sent operation is recorded
pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    handler: Handler,
    sent: StdMutex<Vec<Operation>>,
}

impl ScriptedTransport {
    /// Answers with `handler(operation, call_index)`
    pub fn new(
        kind: TransportKind,
        handler: impl Fn(&Operation, usize) -> TransportResult<RawResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            handler: Box::new(handler),
            sent: StdMutex::new(Vec::new()),
        }
    }

    /// Answers in order; once exhausted the last answer repeats
    pub fn sequence(kind: TransportKind, answers: Vec<TransportResult<RawResult>>) -> Self {
        let answers = StdMutex::new(VecDeque::from(answers));
        let last = StdMutex::new(None::<TransportResult<RawResult>>);
        Self::new(kind, move |_, _| {
            let mut queue = answers.lock().unwrap();
            let mut last = last.lock().unwrap();
            if let Some(next) = queue.pop_front() {
                *last = Some(next.clone());
                next
            } else {
                last.clone().unwrap_or(Err(TransportError::Closed))
            }
        })
    }

    /// Operations sent so far
    pub fn sent(&self) -> Vec<Operation> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of operations sent
    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        let index = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(operation.clone());
            sent.len() - 1
        };
        (self.handler)(operation, index)
    }

    async fn close(&self) {}
}

/// A minimal HTTP/1.1 server answering canned responses, one per connection
pub(crate) struct HttpFixture {
    pub port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

impl HttpFixture {
    /// Serves `responses` in order
    pub async fn serve(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                log.lock().await.push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { port, requests }
    }

    /// Accepts connections and never answers
    pub async fn silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Self {
            port,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Formats a response that closes the connection
    pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status} Fixture\r\n");
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        out
    }

    /// Requests received so far (head and body)
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let Ok(n) = socket.read(&mut buf).await else {
            break;
        };
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}
