// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over the RTU transport.

mod support;

use std::time::Duration;

use modbus_master::{
    master::{CallOptions, Config, Master, RtuConfig, TransportConfig},
    Error, Response,
};
use support::mock_connection;

fn rtu_config() -> Config {
    Config {
        transport: TransportConfig::Rtu(RtuConfig::default()),
        default_unit: 1,
        default_max_retries: 0,
        default_timeout: Duration::from_millis(1000),
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn read_holding_registers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();

    let frame = remote.next_write().await;
    assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0x05, 0xCB]);

    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB3]);

    let response = handle.wait().await.unwrap();
    assert_eq!(response, Response::ReadHoldingRegisters(vec![10, 11, 12]));
}

#[tokio::test(start_paused = true)]
async fn exception_consumes_the_retry_budget() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            retry_on_exception: true,
            default_max_retries: 2,
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();

    // Illegal data address, three times
    for _ in 0..3 {
        let frame = remote.next_write().await;
        assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0x05, 0xCB]);
        remote.send_data(&[0x01, 0x83, 0x02, 0xC0, 0xF1]);
    }

    let err = handle.wait().await.unwrap_err();
    let Error::Exception(rsp) = err else {
        panic!("unexpected outcome: {err}");
    };
    assert_eq!(rsp.function, 0x03);
    assert_eq!(rsp.exception.code(), 0x02);
    assert_eq!(remote.written().len(), 0, "no fourth attempt");
}

#[tokio::test(start_paused = true)]
async fn exception_without_retry_terminates_at_once() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            retry_on_exception: false,
            default_max_retries: 2,
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;
    remote.send_data(&[0x01, 0x83, 0x02, 0xC0, 0xF1]);

    assert!(matches!(
        handle.wait().await.unwrap_err(),
        Error::Exception(_)
    ));
    assert!(remote.written().is_empty(), "no retry");
}

#[tokio::test(start_paused = true)]
async fn corrupted_crc_is_retried() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            default_max_retries: 1,
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();

    let _ = remote.next_write().await;
    // Correct frame with the final CRC byte flipped
    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB4]);

    // Second attempt succeeds
    let frame = remote.next_write().await;
    assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0x05, 0xCB]);
    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB3]);

    let response = handle.wait().await.unwrap();
    assert_eq!(response, Response::ReadHoldingRegisters(vec![10, 11, 12]));
}

#[tokio::test(start_paused = true)]
async fn timeout_exhaustion_observes_two_frames() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            default_max_retries: 1,
            default_timeout: Duration::from_millis(50),
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();

    let first = remote.next_write().await;
    let second = remote.next_write().await;
    assert_eq!(first, second);

    assert!(matches!(handle.wait().await.unwrap_err(), Error::Timeout));
    assert!(remote.written().is_empty(), "exactly two frames");
}

#[tokio::test(start_paused = true)]
async fn short_frame_is_an_incomplete_response() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;
    remote.send_data(&[0x01, 0x03, 0x06]);

    assert!(matches!(
        handle.wait().await.unwrap_err(),
        Error::IncompleteResponseFrame
    ));
}

#[tokio::test(start_paused = true)]
async fn response_from_the_wrong_unit_is_rejected() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let handle = master
        .read_coils(0, 8, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;
    // Well-formed frame, but from unit 2
    remote.send_data(&[0x02, 0x01, 0x01, 0x55, 0x91, 0xF3]);

    assert!(matches!(
        handle.wait().await.unwrap_err(),
        Error::InvalidResponseData(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn echo_is_stripped_before_parsing() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            transport: TransportConfig::Rtu(RtuConfig {
                enable_echo: true,
                ..RtuConfig::default()
            }),
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let frame = remote.next_write().await;

    // The bus echoes our own transmission, then the slave answers.
    remote.send_data(&frame);
    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB3]);

    let response = handle.wait().await.unwrap();
    assert_eq!(response, Response::ReadHoldingRegisters(vec![10, 11, 12]));
}

#[tokio::test(start_paused = true)]
async fn missing_echo_fails_the_transaction() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            transport: TransportConfig::Rtu(RtuConfig {
                enable_echo: true,
                ..RtuConfig::default()
            }),
            ..rtu_config()
        },
    )
    .unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;

    // Only half of the echo comes back before the line goes idle.
    remote.send_data(&[0x01, 0x03, 0x00, 0x00]);

    assert!(matches!(
        handle.wait().await.unwrap_err(),
        Error::IncompleteResponseFrame
    ));
}

#[tokio::test(start_paused = true)]
async fn close_fails_in_flight_transactions() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;
    remote.close();

    assert!(matches!(
        handle.wait().await.unwrap_err(),
        Error::ConnectionClosed
    ));
}

#[tokio::test(start_paused = true)]
async fn terminal_errors_reach_the_error_channel() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            default_timeout: Duration::from_millis(50),
            ..rtu_config()
        },
    )
    .unwrap();
    let mut errors = master.errors();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;

    assert!(matches!(handle.wait().await.unwrap_err(), Error::Timeout));
    assert!(matches!(errors.recv().await, Some(Error::Timeout)));
}

#[tokio::test(start_paused = true)]
async fn suppressed_errors_stay_off_the_error_channel() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            suppress_transaction_errors: true,
            default_timeout: Duration::from_millis(50),
            ..rtu_config()
        },
    )
    .unwrap();
    let mut errors = master.errors();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;

    assert!(matches!(handle.wait().await.unwrap_err(), Error::Timeout));
    assert!(errors.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_fire_in_order() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let mut handle = master
        .read_holding_registers(0, 3, CallOptions::default().events())
        .unwrap();
    let mut events = handle.take_events().unwrap();

    let _ = remote.next_write().await;
    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB3]);
    assert!(handle.wait().await.is_ok());

    use modbus_master::TransactionEvent;
    assert_eq!(events.recv().await, Some(TransactionEvent::Request { attempt: 1 }));
    assert_eq!(events.recv().await, Some(TransactionEvent::Response));
    assert_eq!(events.recv().await, Some(TransactionEvent::Complete));
    assert_eq!(events.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn cancelled_transactions_stay_silent() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, rtu_config()).unwrap();

    let handle = master
        .read_holding_registers(0, 3, CallOptions::default())
        .unwrap();
    let _ = remote.next_write().await;
    handle.cancel();

    // The late response is dropped on the floor.
    remote.send_data(&[0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0xC8, 0xB3]);

    assert!(matches!(handle.wait().await.unwrap_err(), Error::Cancelled));
}
