//! 宿主进程代理传输
//!
//! 原生引擎运行在独立的宿主进程中（见 [`crate::host`]），本端通过字节流
//! 以请求/响应方式调用，入站事件以 `EventCallback` 帧混合在响应流中送达。
//!
//! 同一时刻只有一个请求在途：写锁覆盖"写请求 + 等待响应"全过程。
//! 读线程把响应帧转交给等待方，把事件帧直接分发给已注册的回调。

use crate::frame::{
    CreateRequest, EventPayload, Frame, Function, NumberEventPayload, Response,
    SetCallbackPayload, encode_u64,
};
use crate::{BridgeDeviceError, BridgeDeviceErrorKind, BridgeError, EventSink, SinkTable, Transport};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 默认响应超时
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Shared {
    sinks: SinkTable,
    closed: AtomicBool,
}

/// 宿主进程代理
pub struct ProxyBridge {
    writer: Mutex<Box<dyn Write + Send>>,
    responses: Receiver<Frame>,
    shared: Arc<Shared>,
    response_timeout: Duration,
    reader: Option<JoinHandle<()>>,
    child: Option<Child>,
}

impl ProxyBridge {
    /// 基于一对字节流创建代理
    ///
    /// # 参数
    /// - `reader`: 宿主 → 本端（响应帧与事件帧）
    /// - `writer`: 本端 → 宿主（请求帧）
    pub fn new<R, W>(reader: R, writer: W) -> Result<Self, BridgeError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            sinks: SinkTable::new(),
            closed: AtomicBool::new(false),
        });
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();

        let shared_clone = shared.clone();
        let reader = thread::Builder::new()
            .name("bridge-proxy-rx".into())
            .spawn(move || read_loop(reader, resp_tx, shared_clone))?;

        Ok(Self {
            writer: Mutex::new(Box::new(writer)),
            responses: resp_rx,
            shared,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reader: Some(reader),
            child: None,
        })
    }

    /// 启动宿主进程并通过其 stdin/stdout 通信
    ///
    /// 宿主的 stderr 继承当前进程（宿主日志直接可见）。
    pub fn spawn(command: &mut Command) -> Result<Self, BridgeError> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                BridgeDeviceError::new(
                    BridgeDeviceErrorKind::SpawnFailed,
                    format!("{:?}: {}", command.get_program(), e),
                )
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(BridgeDeviceError::new(
                BridgeDeviceErrorKind::SpawnFailed,
                "host stdio not captured",
            )
            .into());
        };

        info!("Spawned bridge host (pid {})", child.id());
        let mut bridge = Self::new(stdout, stdin)?;
        bridge.child = Some(child);
        Ok(bridge)
    }

    /// 设置响应超时
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// 宿主连接是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// 发送请求并等待同功能号的响应
    ///
    /// 宿主报告失败时返回 `BridgeDeviceErrorKind::Backend`。
    fn call(&self, function: Function, payload: Bytes) -> Result<Bytes, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }

        let mut writer = self.writer.lock();

        // 丢弃之前超时请求的迟到响应
        while let Ok(stale) = self.responses.try_recv() {
            debug!("Discarding stale response for {:?}", stale.function);
        }

        Frame::new(function, payload).write_to(&mut **writer)?;

        let response = match self.responses.recv_timeout(self.response_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Bridge host did not answer {:?} in time", function);
                return Err(BridgeError::Timeout);
            },
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BridgeDeviceError::new(
                    BridgeDeviceErrorKind::HostExited,
                    "host stream closed",
                )
                .into());
            },
        };
        drop(writer);

        if response.function != function {
            return Err(BridgeError::UnexpectedFunction {
                expected: function.into(),
                actual: response.function.into(),
            });
        }
        match Response::decode(response.payload)? {
            Response::Ok(body) => Ok(body),
            Response::Failed(message) => {
                warn!("Bridge host rejected {:?}: {}", function, message);
                Err(BridgeDeviceError::new(BridgeDeviceErrorKind::Backend, message).into())
            },
        }
    }
}

fn read_loop<R: Read>(mut reader: R, responses: Sender<Frame>, shared: Arc<Shared>) {
    loop {
        match Frame::read_from(&mut reader) {
            Ok(Some(frame)) if frame.function == Function::EventCallback => {
                match EventPayload::decode(frame.payload) {
                    Ok(event) => {
                        trace!(
                            "Inbound event 0x{:016X} tag 0x{:016X}: {}",
                            event.event_code,
                            event.tag,
                            hex::encode(&event.data)
                        );
                        shared.sinks.dispatch(event.event_code, &event.data, event.tag);
                    },
                    Err(e) => warn!("Malformed event frame from host: {}", e),
                }
            },
            Ok(Some(frame)) => {
                if responses.send(frame).is_err() {
                    break;
                }
            },
            Ok(None) => {
                info!("Bridge host closed the stream");
                break;
            },
            Err(e) => {
                warn!("Bridge host stream error: {}", e);
                break;
            },
        }
    }
    shared.closed.store(true, Ordering::Release);
}

fn expect_empty(function: Function, payload: Bytes) -> Result<(), BridgeError> {
    if !payload.is_empty() {
        debug!(
            "Ignoring {} unexpected response bytes for {:?}",
            payload.len(),
            function
        );
    }
    Ok(())
}

impl Transport for ProxyBridge {
    fn create(&self, name: &str, debuggable: bool, log_path: &str) -> Result<(), BridgeError> {
        let request = CreateRequest {
            name: name.to_string(),
            debuggable,
            log_path: log_path.to_string(),
        };
        let payload = self.call(Function::Create, request.encode()?)?;
        expect_empty(Function::Create, payload)
    }

    fn destroy(&self) -> Result<(), BridgeError> {
        let payload = self.call(Function::Destroy, Bytes::new())?;
        expect_empty(Function::Destroy, payload)
    }

    fn initialize(&self) -> Result<bool, BridgeError> {
        let payload = self.call(Function::Initialize, Bytes::new())?;
        match payload.first() {
            Some(ok) => Ok(*ok != 0),
            None => Err(BridgeDeviceError::new(
                BridgeDeviceErrorKind::InvalidResponse,
                "empty initialize response",
            )
            .into()),
        }
    }

    fn uninitialize(&self) -> Result<(), BridgeError> {
        let payload = self.call(Function::Uninitialize, Bytes::new())?;
        expect_empty(Function::Uninitialize, payload)
    }

    fn send_event(&self, event_code: u64, data: &[u8], tag: u64) -> Result<(), BridgeError> {
        let request = EventPayload::new(event_code, Bytes::copy_from_slice(data), tag);
        let payload = self.call(Function::SendEvent, request.encode()?)?;
        expect_empty(Function::SendEvent, payload)
    }

    fn send_event_with_string(
        &self,
        event_code: u64,
        data: &str,
        tag: u64,
    ) -> Result<(), BridgeError> {
        let request = EventPayload::new(event_code, Bytes::copy_from_slice(data.as_bytes()), tag);
        let payload = self.call(Function::SendEventWithString, request.encode()?)?;
        expect_empty(Function::SendEventWithString, payload)
    }

    fn send_event_with_number(
        &self,
        event_code: u64,
        data: u64,
        tag: u64,
    ) -> Result<(), BridgeError> {
        let request = NumberEventPayload {
            event_code,
            tag,
            value: data,
        };
        let payload = self.call(Function::SendEventWithNumber, request.encode())?;
        expect_empty(Function::SendEventWithNumber, payload)
    }

    fn set_event_callback(
        &self,
        event_code: u64,
        sink: Option<EventSink>,
    ) -> Result<(), BridgeError> {
        let request = SetCallbackPayload {
            event_code,
            enabled: sink.is_some(),
        };
        // 先登记本地回调，宿主开始推送时不会丢事件
        self.shared.sinks.set(event_code, sink);
        let payload = self.call(Function::SetEventCallback, request.encode())?;
        expect_empty(Function::SetEventCallback, payload)
    }

    fn get_security_key_by_keychain_index(&self, index: u64) -> Result<String, BridgeError> {
        let payload = self.call(Function::GetSecurityKey, encode_u64(index))?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }
}

impl Drop for ProxyBridge {
    fn drop(&mut self) {
        // 关闭请求流，宿主读到 EOF 后退出
        *self.writer.lock() = Box::new(io::sink());
        self.shared.sinks.clear();

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!("Bridge host exited: {}", status),
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                },
            }
        }

        if let Some(handle) = self.reader.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // 读端由对方关闭时才会返回，这里不阻塞
                debug!("Bridge proxy reader still running, detaching");
            }
        }
    }
}

