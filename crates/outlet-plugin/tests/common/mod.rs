//! Shared helpers for outlet-plugin integration tests.
//!
//! [`FakeHost`] listens on an ephemeral loopback port and speaks the framing
//! codec the way a host controller would: it answers version probes and
//! registration calls, records log lines, and can be told to reject the
//! plugin, refuse callback channels, or drop every connection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outlet_core::protocol::messages::{
    ChannelRole, HelloMessage, RegisterAckMessage, RegisterPluginMessage, RpcMessage,
    WriteLogMessage,
};
use outlet_plugin::infrastructure::network::rpc_channel::{read_frame, write_frame};
use outlet_plugin::infrastructure::network::{ChannelOptions, TcpChannelConnector};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const API_VERSION: u32 = 4;

/// How the fake host treats the plugin.
#[derive(Debug, Clone, Default)]
pub struct HostBehaviour {
    /// Answer registration with `accepted: false`.
    pub reject_registration: bool,
    /// Close callback-channel connections right after their `Hello`.
    pub drop_callback_channel: bool,
}

#[derive(Default)]
struct HostState {
    behaviour: HostBehaviour,
    open_connections: AtomicUsize,
    disconnects: AtomicUsize,
    hellos: Mutex<Vec<HelloMessage>>,
    registrations: Mutex<Vec<RegisterPluginMessage>>,
    logs: Mutex<Vec<WriteLogMessage>>,
}

pub struct FakeHost {
    pub port: u16,
    state: Arc<HostState>,
    /// Bumped by [`FakeHost::drop_all`]; connections end when it changes.
    epoch: watch::Sender<u64>,
    accept_task: JoinHandle<()>,
}

impl FakeHost {
    pub async fn start(behaviour: HostBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake host");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(HostState {
            behaviour,
            ..HostState::default()
        });
        let (epoch, _) = watch::channel(0u64);

        let accept_state = Arc::clone(&state);
        let accept_epoch = epoch.subscribe();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&accept_state),
                    accept_epoch.clone(),
                ));
            }
        });

        Self {
            port,
            state,
            epoch,
            accept_task,
        }
    }

    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    pub fn disconnects_received(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn hellos(&self) -> Vec<HelloMessage> {
        self.state.hellos.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<RegisterPluginMessage> {
        self.state.registrations.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<WriteLogMessage> {
        self.state.logs.lock().unwrap().clone()
    }

    /// Closes every open connection from the host side.
    pub fn drop_all(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }

    /// Polls `condition` every 10 ms until it holds or two seconds pass.
    pub async fn wait_until(&self, condition: impl Fn(&FakeHost) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_all();
    }
}

async fn serve(stream: TcpStream, state: Arc<HostState>, mut epoch: watch::Receiver<u64>) {
    state.open_connections.fetch_add(1, Ordering::SeqCst);
    let started = *epoch.borrow_and_update();
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => frame,
                _ => break,
            },
            _ = epoch.wait_for(|e| *e != started) => break,
        };

        let reply = match frame.message {
            RpcMessage::Hello(hello) => {
                let drop_it = hello.role == ChannelRole::Callback
                    && state.behaviour.drop_callback_channel;
                state.hellos.lock().unwrap().push(hello);
                if drop_it {
                    break;
                }
                None
            }
            RpcMessage::GetApiVersion => Some(RpcMessage::ApiVersion(API_VERSION)),
            RpcMessage::RegisterPlugin(registration) => {
                state.registrations.lock().unwrap().push(registration);
                let accepted = !state.behaviour.reject_registration;
                Some(RpcMessage::RegisterAck(RegisterAckMessage {
                    accepted,
                    reason: if accepted {
                        String::new()
                    } else {
                        "instance not allowed".to_string()
                    },
                }))
            }
            RpcMessage::WriteLog(line) => {
                state.logs.lock().unwrap().push(line);
                None
            }
            RpcMessage::Disconnect { .. } => {
                state.disconnects.fetch_add(1, Ordering::SeqCst);
                break;
            }
            _ => None,
        };

        if let Some(reply) = reply {
            if write_frame(&mut writer, &reply, frame.call_id).await.is_err() {
                break;
            }
        }
    }

    state.open_connections.fetch_sub(1, Ordering::SeqCst);
}

/// A connector with short timeouts suitable for tests.
pub fn test_connector() -> TcpChannelConnector {
    TcpChannelConnector::new(ChannelOptions {
        connect_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(2),
    })
}

/// A temp directory unique to one test.
pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{prefix}_{}", uuid::Uuid::new_v4()))
}
