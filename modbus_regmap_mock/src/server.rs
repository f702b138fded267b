use std::future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use crate::SimDevice;

/// Modbus request handler backed by a [`SimDevice`].
///
/// Serves function codes 0x03, 0x06 and 0x10; anything else is answered
/// with an IllegalFunction exception.
#[derive(Clone, Debug)]
pub struct DeviceService {
    device: SimDevice,
}

impl DeviceService {
    #[must_use]
    pub const fn new(device: SimDevice) -> Self {
        Self { device }
    }
}

impl tokio_modbus::server::Service for DeviceService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        tracing::trace!("request {req:?}");
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .device
                .read_holding(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::WriteSingleRegister(addr, value) => self
                .device
                .write_holding(addr, std::slice::from_ref(&value))
                .map(|()| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => {
                // write_holding rejects more than 123 values
                let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
                self.device
                    .write_holding(addr, &values)
                    .map(|()| Response::WriteMultipleRegisters(addr, count))
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        if let Err(e) = &res {
            tracing::debug!("exception reply {e:?}");
        }
        future::ready(res)
    }
}

/// Modbus/TCP front end of a [`SimDevice`].
#[derive(Clone, Debug, Default)]
pub struct MockServer {
    device: SimDevice,
}

impl MockServer {
    #[must_use]
    pub const fn new(device: SimDevice) -> Self {
        Self { device }
    }

    #[must_use]
    pub const fn device(&self) -> &SimDevice {
        &self.device
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("mock device listening on {}", listener.local_addr()?);
        self.run_listener_on(listener).await
    }

    /// Serve connections accepted on an already bound listener.
    pub async fn run_listener_on(&self, listener: TcpListener) -> anyhow::Result<()> {
        let server = Server::new(listener);
        let device = self.device.clone();
        let on_connected = move |stream, socket_addr| {
            let device = device.clone();
            async move {
                accept_tcp_connection(stream, socket_addr, move |peer| {
                    tracing::debug!("connection from {peer}");
                    Ok(Some(DeviceService::new(device.clone())))
                })
            }
        };
        let on_process_error = |err| {
            tracing::debug!("connection closed: {err}");
        };
        server.serve(&on_connected, on_process_error).await?;
        Ok(())
    }
}

/// Serve `device` on an ephemeral localhost port from a background thread
/// with its own runtime. The server lives until the process exits.
pub fn serve_in_background(device: SimDevice) -> std::io::Result<SocketAddr> {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    std_listener.set_nonblocking(true)?;
    let addr = std_listener.local_addr()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("regmap-mock".into())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match TcpListener::from_std(std_listener) {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::error!("mock listener: {e}");
                        return;
                    }
                };
                if let Err(e) = MockServer::new(device).run_listener_on(listener).await {
                    tracing::error!("mock server stopped: {e}");
                }
            });
        })?;
    Ok(addr)
}
