//! Modbus TCP server: single unit ID, exposing the register bank's coils,
//! discrete inputs, holding registers, and input registers over function
//! codes 01/02/03/04/05/06/15/16.
//!
//! Reads are served directly from the bank under its read lock. Writes are
//! never applied in place here — they are queued onto the pending-writes
//! channel and drained by the orchestrator's command-drain loop before the
//! next tick, per the bank's single-writer-per-tick rule.

use std::future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::Server;

use crate::registers::{PendingWrite, RegisterBank, COIL_COUNT, DISCRETE_INPUT_COUNT, HOLDING_REGISTER_COUNT, INPUT_REGISTER_COUNT};

/// Modbus unit ID served by this process; multi-unit addressing is out of
/// scope.
pub const UNIT_ID: u8 = 1;

pub struct WtpModbusService {
    bank: Arc<RegisterBank>,
    pending_writes: Sender<PendingWrite>,
}

impl tokio_modbus::server::Service for WtpModbusService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        tracing::debug!(?req, "modbus request");

        let res = match req {
            Request::ReadCoils(addr, cnt) => read_bits(self.bank.read_coils(addr as usize, cnt as usize))
                .map(Response::ReadCoils),
            Request::ReadDiscreteInputs(addr, cnt) => {
                read_bits(self.bank.read_discretes(addr as usize, cnt as usize)).map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                read_words(self.bank.read_holding(addr as usize, cnt as usize)).map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, cnt) => {
                read_words(self.bank.read_input(addr as usize, cnt as usize)).map(Response::ReadInputRegisters)
            }
            Request::WriteSingleCoil(addr, value) => {
                if (addr as usize) >= COIL_COUNT {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    self.queue_write(PendingWrite::Coil { index: addr as usize, value })
                        .map(|_| Response::WriteSingleCoil(addr, value))
                }
            }
            Request::WriteSingleRegister(addr, value) => {
                if (addr as usize) >= HOLDING_REGISTER_COUNT {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    self.queue_write(PendingWrite::HoldingRegister { index: addr as usize, value })
                        .map(|_| Response::WriteSingleRegister(addr, value))
                }
            }
            Request::WriteMultipleCoils(addr, ref values) => {
                if (addr as usize) + values.len() > COIL_COUNT {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    let cnt = values.len() as u16;
                    self.queue_writes(values.iter().enumerate().map(|(i, v)| PendingWrite::Coil {
                        index: addr as usize + i,
                        value: *v,
                    }))
                    .map(|_| Response::WriteMultipleCoils(addr, cnt))
                }
            }
            Request::WriteMultipleRegisters(addr, ref values) => {
                if (addr as usize) + values.len() > HOLDING_REGISTER_COUNT {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    let cnt = values.len() as u16;
                    self.queue_writes(values.iter().enumerate().map(|(i, v)| PendingWrite::HoldingRegister {
                        index: addr as usize + i,
                        value: *v,
                    }))
                    .map(|_| Response::WriteMultipleRegisters(addr, cnt))
                }
            }
            _ => {
                tracing::warn!("unsupported modbus function code");
                Err(ExceptionCode::IllegalFunction)
            }
        };

        if let Err(e) = &res {
            tracing::debug!(exception = ?e, "modbus request rejected");
        }

        future::ready(res)
    }
}

fn read_bits(values: Option<Vec<bool>>) -> Result<Vec<bool>, ExceptionCode> {
    values.ok_or(ExceptionCode::IllegalDataAddress)
}

fn read_words(values: Option<Vec<u16>>) -> Result<Vec<u16>, ExceptionCode> {
    values.ok_or(ExceptionCode::IllegalDataAddress)
}

impl WtpModbusService {
    fn queue_write(&self, write: PendingWrite) -> Result<(), ExceptionCode> {
        self.pending_writes
            .try_send(write)
            .map_err(|_| ExceptionCode::ServerDeviceBusy)
    }

    fn queue_writes(&self, writes: impl Iterator<Item = PendingWrite>) -> Result<(), ExceptionCode> {
        for write in writes {
            self.queue_write(write)?;
        }
        Ok(())
    }
}

/// Bind and serve the Modbus TCP listener until the process shuts down.
/// Marks the engine's comm-fault flag if the listener cannot be bound.
pub async fn serve(
    addr: SocketAddr,
    bank: Arc<RegisterBank>,
    pending_writes: Sender<PendingWrite>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind modbus listener on {addr}: {e}"))?;

    tracing::info!(%addr, "modbus tcp server listening");

    let server = Server::new(listener);
    let new_service = move |_socket_addr: SocketAddr| {
        Ok(Some(WtpModbusService {
            bank: Arc::clone(&bank),
            pending_writes: pending_writes.clone(),
        }))
    };
    let on_connected = move |stream, socket_addr| async move {
        tokio_modbus::server::tcp::accept_tcp_connection(stream, socket_addr, new_service)
    };
    let on_process_error = |err| tracing::error!(%err, "modbus connection error");

    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{coil, hr};
    use tokio::sync::mpsc;
    use tokio_modbus::server::Service;

    fn make_service() -> (Arc<RegisterBank>, WtpModbusService, tokio::sync::mpsc::Receiver<PendingWrite>) {
        let bank = Arc::new(RegisterBank::new());
        let (tx, rx) = mpsc::channel(16);
        let service = WtpModbusService {
            bank: Arc::clone(&bank),
            pending_writes: tx,
        };
        (bank, service, rx)
    }

    #[tokio::test]
    async fn read_holding_registers_in_range() {
        let (bank, service, _rx) = make_service();
        let mut holding = [0u16; HOLDING_REGISTER_COUNT];
        holding[hr::TURB_RAW] = 55;
        bank.commit_tick(holding, [0; INPUT_REGISTER_COUNT], [false; DISCRETE_INPUT_COUNT]);

        let res = service
            .call(Request::ReadHoldingRegisters(hr::TURB_RAW as u16, 1))
            .await
            .unwrap();
        match res {
            Response::ReadHoldingRegisters(values) => assert_eq!(values, vec![55]),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_out_of_range_returns_illegal_data_address() {
        let (_bank, service, _rx) = make_service();
        let res = service.call(Request::ReadHoldingRegisters(100, 5)).await;
        assert_eq!(res.unwrap_err(), ExceptionCode::IllegalDataAddress);
    }

    #[tokio::test]
    async fn write_single_coil_is_queued_not_applied_directly() {
        let (bank, service, mut rx) = make_service();
        let res = service.call(Request::WriteSingleCoil(coil::INTAKE as u16, true)).await;
        assert!(res.is_ok());
        assert!(!bank.coil_snapshot()[coil::INTAKE], "write must not bypass the queue");
        let queued = rx.try_recv().unwrap();
        matches!(queued, PendingWrite::Coil { index, value } if index == coil::INTAKE && value);
    }

    #[tokio::test]
    async fn write_multiple_registers_queues_each_value() {
        let (_bank, service, mut rx) = make_service();
        let res = service
            .call(Request::WriteMultipleRegisters(hr::LEVEL_PCT as u16, vec![10, 20].into()))
            .await;
        assert!(res.is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsupported_function_code_is_illegal_function() {
        let (_bank, service, _rx) = make_service();
        let res = service.call(Request::Custom(0x99, vec![].into())).await;
        assert_eq!(res.unwrap_err(), ExceptionCode::IllegalFunction);
    }
}
