// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over the tunnel transport.
//!
//! The test plays the external bus master: it polls our slave id 0x7F
//! with `SLAVE_COMMAND` (0x47) frames and carries responses back in the
//! poll payloads.

mod support;

use std::time::Duration;

use modbus_master::{
    master::{CallOptions, Config, Master, TransportConfig, TunnelConfig},
    Response, SniffEvent,
};
use support::mock_connection;

fn tunnel_config() -> Config {
    Config {
        transport: TransportConfig::Tunnel(TunnelConfig::new(0x7F)),
        max_concurrent_requests: 16,
        default_unit: 1,
        default_max_retries: 0,
        default_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

const POLL_0: &[u8] = &[0x7F, 0x47, 0x00, 0x73, 0xE8];
const POLL_1: &[u8] = &[0x7F, 0x47, 0x01, 0xB2, 0x28];
const MINIMAL_REPLY_1: &[u8] = &[0x7F, 0x47, 0x01, 0xB2, 0x28];

#[tokio::test(start_paused = true)]
async fn piggybacks_a_request_on_the_polling_cycle() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, tunnel_config()).unwrap();

    let handle = master.report_slave_id(CallOptions::default()).unwrap();

    // Poll for sequence 0, nothing to deliver yet: our reply forwards the
    // request to unit 1 and advances the sequence.
    remote.send_data(POLL_0);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x00, 0x01, 0x11, 0xE4, 0xE2]);

    // Poll for sequence 1 carries the response payload.
    remote.send_data(&[
        0x7F, 0x47, 0x01, 0x11, 0x05, 0x0A, 0xFF, 0x01, 0x02, 0x03, 0x2D, 0xC3,
    ]);
    let response = handle.wait().await.unwrap();
    let Response::ReportSlaveId(report) = response else {
        panic!("unexpected response: {response}");
    };
    assert_eq!(report.product, 0x0A);
    assert!(report.is_running());
    assert_eq!(report.version, [1, 2, 3]);
    assert!(report.extra.is_empty());

    // Nothing left to forward: the poll gets the minimal reply and the
    // sequence stays at 1.
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], MINIMAL_REPLY_1);

    remote.send_data(POLL_1);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], MINIMAL_REPLY_1);
}

#[tokio::test(start_paused = true)]
async fn out_of_sequence_polls_leave_the_state_alone() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, tunnel_config()).unwrap();

    let handle = master.report_slave_id(CallOptions::default()).unwrap();

    // Sequence is 0; a poll for 5 only gets the echoing minimal reply.
    remote.send_data(&[0x7F, 0x47, 0x05, 0xB3, 0xEB]);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x05, 0xB3, 0xEB]);

    // The matching poll still finds the request queued.
    remote.send_data(POLL_0);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x00, 0x01, 0x11, 0xE4, 0xE2]);

    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn foreign_traffic_is_sniffed_but_ignored() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, tunnel_config()).unwrap();
    let mut sniffer = master.sniffer();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // A well-formed frame for unit 0x22: no reply, no state change.
    remote.send_data(&[0x22, 0x03, 0x00, 0x00, 0x00, 0x01, 0x83, 0x59]);
    let event = sniffer.recv().await.unwrap();
    let SniffEvent::Pdu { unit, pdu } = event else {
        panic!("expected a pdu event");
    };
    assert_eq!(unit, 0x22);
    assert_eq!(&pdu[..], &[0x03, 0x00, 0x00, 0x00, 0x01]);
    assert!(remote.written().is_empty());

    // A truncated burst and a corrupted frame are classified, not parsed.
    remote.send_data(&[0x7F, 0x47]);
    assert!(matches!(
        sniffer.recv().await.unwrap(),
        SniffEvent::Incomplete(_)
    ));
    remote.send_data(&[0x7F, 0x47, 0x00, 0x73, 0xE9]);
    assert!(matches!(
        sniffer.recv().await.unwrap(),
        SniffEvent::BadChecksum(_)
    ));

    // The polling convention still works afterwards.
    remote.send_data(POLL_0);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x00, 0x73, 0xE8]);
}

#[tokio::test(start_paused = true)]
async fn pipelines_queued_requests_across_polls() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(conn, tunnel_config()).unwrap();

    // Three requests: two fill the transport (current + next), the third
    // waits in the master's queue.
    let first = master
        .read_holding_registers(0x00, 1, CallOptions::default())
        .unwrap();
    let second = master
        .read_holding_registers(0x0A, 1, CallOptions::default())
        .unwrap();
    let third = master
        .read_holding_registers(0x14, 1, CallOptions::default())
        .unwrap();

    remote.send_data(POLL_0);
    let reply = remote.next_write().await;
    assert_eq!(
        &reply[..],
        &[0x7F, 0x47, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xEF, 0x05]
    );

    // Response for the first, second request forwarded in the same reply.
    remote.send_data(&[0x7F, 0x47, 0x01, 0x03, 0x02, 0x00, 0x2A, 0x87, 0x2B]);
    assert_eq!(
        first.wait().await.unwrap(),
        Response::ReadHoldingRegisters(vec![42])
    );
    let reply = remote.next_write().await;
    assert_eq!(
        &reply[..],
        &[0x7F, 0x47, 0x01, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x01, 0xDF, 0xC7]
    );

    remote.send_data(&[0x7F, 0x47, 0x02, 0x03, 0x02, 0x00, 0x2B, 0x02, 0xEB]);
    assert_eq!(
        second.wait().await.unwrap(),
        Response::ReadHoldingRegisters(vec![43])
    );
    let reply = remote.next_write().await;
    assert_eq!(
        &reply[..],
        &[0x7F, 0x47, 0x02, 0x01, 0x03, 0x00, 0x14, 0x00, 0x01, 0x8C, 0xC1]
    );

    remote.send_data(&[0x7F, 0x47, 0x03, 0x03, 0x02, 0x00, 0x2C, 0x7E, 0xE9]);
    assert_eq!(
        third.wait().await.unwrap(),
        Response::ReadHoldingRegisters(vec![44])
    );
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x03, 0x33, 0xE9]);
}

#[tokio::test(start_paused = true)]
async fn lost_reply_is_recovered_by_the_timeout_path() {
    let (conn, remote) = mock_connection();
    let master = Master::attach(
        conn,
        Config {
            default_max_retries: 1,
            default_timeout: Duration::from_millis(200),
            ..tunnel_config()
        },
    )
    .unwrap();

    let handle = master.report_slave_id(CallOptions::default()).unwrap();

    remote.send_data(POLL_0);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], &[0x7F, 0x47, 0x00, 0x01, 0x11, 0xE4, 0xE2]);

    // The external master keeps polling but never delivers a payload.
    remote.send_data(POLL_1);
    let reply = remote.next_write().await;
    assert_eq!(&reply[..], MINIMAL_REPLY_1);

    // After the per-attempt timeout the retry re-queues the request; the
    // next matching poll forwards it again (sequence has moved to 1).
    tokio::time::sleep(Duration::from_millis(250)).await;
    remote.send_data(POLL_1);
    let reply = remote.next_write().await;
    assert_eq!(
        &reply[..],
        &[0x7F, 0x47, 0x01, 0x01, 0x11, 0xB5, 0x22],
        "retry is re-attached to the next matching poll"
    );

    remote.send_data(&[
        0x7F, 0x47, 0x02, 0x11, 0x05, 0x0A, 0xFF, 0x01, 0x02, 0x03, 0x6D, 0xD6,
    ]);
    assert!(handle.wait().await.is_ok());
}
