//! 宿主进程侧的请求处理循环
//!
//! 宿主读取请求帧，调用被包装的 [`Transport`]，以相同功能号写回响应；
//! 被包装传输的入站回调以 `EventCallback` 帧写到同一条输出流。

use crate::frame::{
    CreateRequest, EventPayload, Frame, Function, NumberEventPayload, Response,
    SetCallbackPayload, decode_u64,
};
use crate::{BridgeError, EventSink, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// 运行宿主循环，直到请求流 EOF
///
/// 返回前注销本循环注册过的所有入站回调。
///
/// # 错误
///
/// 读写流出错时返回 IO 错误；单个请求处理失败记录日志，并以失败状态响应。
pub fn serve<R, W>(mut reader: R, writer: W, bridge: Arc<dyn Transport>) -> Result<(), BridgeError>
where
    R: Read,
    W: Write + Send + 'static,
{
    let writer: Arc<Mutex<W>> = Arc::new(Mutex::new(writer));
    let mut enabled: BTreeSet<u64> = BTreeSet::new();

    let result = loop {
        let frame = match Frame::read_from(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Bridge client closed the stream");
                break Ok(());
            },
            Err(e) => break Err(e),
        };

        let function = frame.function;
        trace!("Host request {:?} ({} bytes)", function, frame.payload.len());

        let response = match handle(&frame, bridge.as_ref(), &writer, &mut enabled) {
            Ok(payload) => Response::Ok(payload),
            Err(e) => {
                warn!("Host request {:?} failed: {}", function, e);
                Response::failed(e.to_string())
            },
        };

        if let Err(e) = Frame::new(function, response.encode()).write_to(&mut *writer.lock()) {
            break Err(e);
        }
    };

    for code in enabled {
        if let Err(e) = bridge.set_event_callback(code, None) {
            debug!("Failed to unregister sink 0x{:016X}: {}", code, e);
        }
    }
    result
}

fn handle<W: Write + Send + 'static>(
    frame: &Frame,
    bridge: &dyn Transport,
    writer: &Arc<Mutex<W>>,
    enabled: &mut BTreeSet<u64>,
) -> Result<Bytes, BridgeError> {
    let payload = frame.payload.clone();
    match frame.function {
        Function::Create => {
            let request = CreateRequest::decode(payload)?;
            bridge.create(&request.name, request.debuggable, &request.log_path)?;
            Ok(Bytes::new())
        },
        Function::Destroy => {
            bridge.destroy()?;
            Ok(Bytes::new())
        },
        Function::Initialize => {
            let ok = bridge.initialize()?;
            Ok(Bytes::copy_from_slice(&[u8::from(ok)]))
        },
        Function::Uninitialize => {
            bridge.uninitialize()?;
            Ok(Bytes::new())
        },
        Function::SendEvent => {
            let event = EventPayload::decode(payload)?;
            bridge.send_event(event.event_code, &event.data, event.tag)?;
            Ok(Bytes::new())
        },
        Function::SendEventWithString => {
            let event = EventPayload::decode(payload)?;
            let text = String::from_utf8_lossy(&event.data);
            bridge.send_event_with_string(event.event_code, &text, event.tag)?;
            Ok(Bytes::new())
        },
        Function::SendEventWithNumber => {
            let event = NumberEventPayload::decode(payload)?;
            bridge.send_event_with_number(event.event_code, event.value, event.tag)?;
            Ok(Bytes::new())
        },
        Function::SetEventCallback => {
            let request = SetCallbackPayload::decode(payload)?;
            if request.enabled {
                bridge.set_event_callback(request.event_code, Some(event_forwarder(writer)))?;
                enabled.insert(request.event_code);
            } else {
                bridge.set_event_callback(request.event_code, None)?;
                enabled.remove(&request.event_code);
            }
            Ok(Bytes::new())
        },
        Function::GetSecurityKey => {
            let index = decode_u64(payload)?;
            let key = bridge.get_security_key_by_keychain_index(index)?;
            Ok(Bytes::from(key.into_bytes()))
        },
        Function::EventCallback => {
            warn!("Client sent an EventCallback frame, ignored");
            Ok(Bytes::new())
        },
    }
}

/// 把入站事件写成 `EventCallback` 帧
fn event_forwarder<W: Write + Send + 'static>(writer: &Arc<Mutex<W>>) -> EventSink {
    let writer = writer.clone();
    Arc::new(move |event_code: u64, data: &[u8], tag: u64| {
        let payload = match EventPayload::new(event_code, Bytes::copy_from_slice(data), tag).encode()
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping event 0x{:016X}: {}", event_code, e);
                return;
            },
        };
        if let Err(e) = Frame::new(Function::EventCallback, payload).write_to(&mut *writer.lock()) {
            warn!("Failed to forward event 0x{:016X}: {}", event_code, e);
        }
    })
}
