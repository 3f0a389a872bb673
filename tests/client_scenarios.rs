use embassy_sync::channel::Channel;
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use mqtt_layers::backoff::BackoffClass;
use mqtt_layers::error::ConnectReasonCode;
use mqtt_layers::event::{EventQueue, MqttEvent, RequestId};
use mqtt_layers::packet::{MqttPacket, QoS, SubAckReturnCode};
use mqtt_layers::runtime::{MqttRuntime, PublishRequestChannel, PublisherHandle};
use mqtt_layers::MqttError;

mod common;

use common::{ManualClock, client, connected, drain, options, settle, settle_at};

#[test]
fn subscribe_and_receive_after_connack() {
    let (mut client, _clock) = client(options());
    let mut events = EventQueue::<16>::new();
    client.connect().unwrap();
    settle(&mut client, &mut events);
    match client.network_mut().take_packets().as_slice() {
        [MqttPacket::Connect(connect)] => {
            assert_eq!(connect.client_id.as_str(), "it");
            assert_eq!(connect.keep_alive, 30);
            assert!(connect.clean_session);
        }
        other => panic!("unexpected {:?}", other),
    }

    // Queued before the session exists; goes out after CONNACK.
    let id = client.subscribe(&[("cmd/#", QoS::AtLeastOnce)]).unwrap();
    settle(&mut client, &mut events);
    assert!(client.network_mut().take_packets().is_empty());

    client.network_mut().inject(&common::CONNACK);
    settle(&mut client, &mut events);
    assert!(client.is_connected());
    assert_eq!(drain(&mut events), [MqttEvent::Connected { session_present: false }]);
    let packets = client.network_mut().take_packets();
    let [MqttPacket::Subscribe(subscribe)] = packets.as_slice() else {
        panic!("unexpected {:?}", packets);
    };
    assert_eq!(subscribe.packet_id, 1);
    assert_eq!(subscribe.topics[0].0.as_str(), "cmd/#");

    client.network_mut().inject(&[0x90, 0x03, 0x00, 0x01, 0x01]);
    settle(&mut client, &mut events);
    match drain(&mut events).as_slice() {
        [MqttEvent::Subscribed { id: done, result: Ok(codes) }] => {
            assert_eq!(*done, id);
            assert_eq!(codes.as_slice(), [SubAckReturnCode::Granted(QoS::AtLeastOnce)]);
        }
        other => panic!("unexpected {:?}", other),
    }

    // QoS 1 message on cmd/x, packet id 7.
    client.network_mut().inject(&[
        0x32, 0x0B, 0x00, 0x05, b'c', b'm', b'd', b'/', b'x', 0x00, 0x07, b'o', b'n',
    ]);
    settle(&mut client, &mut events);
    match drain(&mut events).as_slice() {
        [MqttEvent::Message(publish)] => {
            assert_eq!(publish.topic.as_str(), "cmd/x");
            assert_eq!(publish.payload.as_slice(), b"on");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.network_mut().take_packets(), [MqttPacket::PubAck(7)]);
}

#[test]
fn idle_session_pings_at_keepalive_and_closes_without_response() {
    let (mut client, clock) = client(options());
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);

    settle_at(&mut client, &clock, 29_999, &mut events);
    assert!(client.network_mut().take_packets().is_empty());
    settle_at(&mut client, &clock, 30_000, &mut events);
    assert_eq!(client.network_mut().take_packets(), [MqttPacket::PingReq]);

    settle_at(&mut client, &clock, 59_999, &mut events);
    assert!(client.is_connected());
    assert!(drain(&mut events).is_empty());

    settle_at(&mut client, &clock, 60_000, &mut events);
    assert!(!client.is_connected());
    assert_eq!(client.last_error(), Some(MqttError::KeepaliveTimeout));
    assert_eq!(
        drain(&mut events),
        [
            MqttEvent::Disconnected {
                reason: Some(MqttError::KeepaliveTimeout)
            },
            MqttEvent::Reconnecting {
                after: Duration::from_secs(1)
            },
        ]
    );
}

#[test]
fn unacknowledged_qos1_publish_is_resent_with_dup_and_completes_once() {
    let (mut client, clock) = client(options().with_ack_timeout(Duration::from_secs(5)));
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);

    let id = client.publish("dev/temp", b"21.5", QoS::AtLeastOnce, false).unwrap();
    settle(&mut client, &mut events);
    let pid = match client.network_mut().take_packets().as_slice() {
        [MqttPacket::Publish(p)] => {
            assert!(!p.dup);
            p.packet_id.unwrap()
        }
        other => panic!("unexpected {:?}", other),
    };

    settle_at(&mut client, &clock, 5_000, &mut events);
    match client.network_mut().take_packets().as_slice() {
        [MqttPacket::Publish(p)] => {
            assert!(p.dup);
            assert_eq!(p.packet_id, Some(pid));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(drain(&mut events).is_empty());

    let puback = [0x40, 0x02, (pid >> 8) as u8, pid as u8];
    client.network_mut().inject(&puback);
    settle_at(&mut client, &clock, 5_100, &mut events);
    client.network_mut().inject(&puback);
    settle_at(&mut client, &clock, 5_200, &mut events);
    assert_eq!(drain(&mut events), [MqttEvent::Published { id, result: Ok(()) }]);
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn lost_connection_reconnects_after_backoff_and_replays_qos1() {
    let (mut client, clock) = client(options());
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);

    let id = client.publish("dev/temp", b"1", QoS::AtLeastOnce, false).unwrap();
    settle(&mut client, &mut events);
    let pid = client.network_mut().take_packets()[0].packet_id().unwrap();

    client.network_mut().reset = true;
    settle_at(&mut client, &clock, 100, &mut events);
    assert_eq!(
        drain(&mut events),
        [
            MqttEvent::Disconnected {
                reason: Some(MqttError::ConnectionReset)
            },
            MqttEvent::Reconnecting {
                after: Duration::from_secs(1)
            },
        ]
    );
    assert_eq!(client.backoff().level(), 1);
    assert_eq!(client.network().closed, 1);

    client.network_mut().reset = false;
    settle_at(&mut client, &clock, 1_099, &mut events);
    assert!(client.network_mut().take_packets().is_empty());
    settle_at(&mut client, &clock, 1_100, &mut events);
    assert!(matches!(
        client.network_mut().take_packets().as_slice(),
        [MqttPacket::Connect(_)]
    ));
    assert_eq!(client.network().opened, 2);

    client.network_mut().inject(&common::CONNACK);
    settle(&mut client, &mut events);
    assert_eq!(drain(&mut events), [MqttEvent::Connected { session_present: false }]);
    match client.network_mut().take_packets().as_slice() {
        [MqttPacket::Publish(p)] => {
            assert!(p.dup);
            assert_eq!(p.packet_id, Some(pid));
        }
        other => panic!("unexpected {:?}", other),
    }

    client.network_mut().inject(&[0x40, 0x02, (pid >> 8) as u8, pid as u8]);
    settle(&mut client, &mut events);
    assert_eq!(drain(&mut events), [MqttEvent::Published { id, result: Ok(()) }]);
}

#[test]
fn connect_timeout_is_retried() {
    let (mut client, clock) = client(options().with_connect_timeout(Duration::from_secs(2)));
    let mut events = EventQueue::<16>::new();
    client.network_mut().hold_connect = true;
    client.connect().unwrap();
    settle(&mut client, &mut events);
    settle_at(&mut client, &clock, 2_000, &mut events);
    assert_eq!(
        drain(&mut events),
        [
            MqttEvent::ConnectFailed(MqttError::Timeout),
            MqttEvent::Reconnecting {
                after: Duration::from_secs(1)
            },
        ]
    );

    client.network_mut().hold_connect = false;
    settle_at(&mut client, &clock, 3_000, &mut events);
    assert!(matches!(
        client.network_mut().take_packets().as_slice(),
        [MqttPacket::Connect(_)]
    ));
}

#[test]
fn refused_credentials_stop_reconnecting() {
    let (mut client, _clock) = client(options());
    let mut events = EventQueue::<16>::new();
    client.connect().unwrap();
    settle(&mut client, &mut events);
    client.network_mut().inject(&[0x20, 0x02, 0x00, 0x05]);
    settle(&mut client, &mut events);

    assert_eq!(
        drain(&mut events),
        [MqttEvent::ConnectFailed(MqttError::ConnectionRefused(
            ConnectReasonCode::NotAuthorized
        ))]
    );
    assert_eq!(client.backoff().class(), BackoffClass::Terminal);
    assert_eq!(
        client.publish("dev/temp", b"1", QoS::AtMostOnce, false),
        Err(MqttError::NotConnected)
    );
}

#[test]
fn disconnect_sends_disconnect_and_fails_pending_requests() {
    let (mut client, _clock) = client(options());
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);

    let publish = client.publish("dev/temp", b"1", QoS::AtLeastOnce, false).unwrap();
    let subscribe = client.subscribe(&[("cmd/#", QoS::AtMostOnce)]).unwrap();
    settle(&mut client, &mut events);
    assert_eq!(client.network_mut().take_packets().len(), 2);

    client.disconnect().unwrap();
    settle(&mut client, &mut events);
    assert_eq!(client.network_mut().take_packets(), [MqttPacket::Disconnect]);

    let events = drain(&mut events);
    assert_eq!(events.len(), 3, "{:?}", events);
    assert!(events.contains(&MqttEvent::Disconnected { reason: None }));
    assert!(events.contains(&MqttEvent::Published {
        id: publish,
        result: Err(MqttError::NotConnected)
    }));
    assert!(events.contains(&MqttEvent::Subscribed {
        id: subscribe,
        result: Err(MqttError::NotConnected)
    }));
    assert!(!client.is_connected());
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn shutdown_releases_the_dispatcher() {
    let (mut client, _clock) = client(options());
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);
    let id = client.publish("dev/temp", b"1", QoS::AtLeastOnce, false).unwrap();
    settle(&mut client, &mut events);
    drain(&mut events);

    assert!(client.should_continue());
    client.shutdown(&mut events);
    assert!(!client.should_continue());
    assert_eq!(client.network().closed, 1);
    assert!(drain(&mut events).contains(&MqttEvent::Published {
        id,
        result: Err(MqttError::NotConnected)
    }));
    assert_eq!(client.connect(), Err(MqttError::NotConnected));
}

/// Never finishes, so the runtime always wakes on the channel.
struct NeverDelay;

impl DelayNs for NeverDelay {
    async fn delay_ns(&mut self, _ns: u32) {
        core::future::pending::<()>().await
    }
}

/// Finishes at once and moves the clock instead.
struct SkipDelay(ManualClock);

impl DelayNs for SkipDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.ms() + u64::from(ns).div_ceil(1_000_000));
    }
}

static OUTBOX: PublishRequestChannel<'static, 4> = Channel::new();

#[test]
fn runtime_forwards_handed_off_publishes() {
    let (mut client, clock) = client(options());
    let mut events = EventQueue::<16>::new();
    connected(&mut client, &mut events);

    let mut runtime = MqttRuntime::new(client, events, OUTBOX.receiver());
    let publisher = PublisherHandle::new(OUTBOX.sender());
    assert!(publisher.try_publish("dev/temp", b"22", QoS::AtMostOnce, false));

    embassy_futures::block_on(runtime.run_once(&mut NeverDelay)).unwrap();
    embassy_futures::block_on(runtime.run_once(&mut SkipDelay(clock.clone()))).unwrap();

    match runtime.client_mut().network_mut().take_packets().as_slice() {
        [MqttPacket::Publish(p)] => {
            assert_eq!(p.topic.as_str(), "dev/temp");
            assert_eq!(p.payload.as_slice(), b"22");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        drain(runtime.handler_mut()),
        [MqttEvent::Published {
            id: RequestId(1),
            result: Ok(())
        }]
    );
    assert_eq!(clock.ms(), 10);
}
