//! End-to-end scenarios driving the receiver through its public surface:
//! tasks in, packets in, frames out.

use core::{num, time::Duration};
use rill_pipeline::{
    FecConfig, FrameSource, ReceiverConfig, ReceiverLoop, SessionConfig, SourceState, Task,
    WriteError, codec::CodecMap, fec,
};
use rill_proto::{
    Frame, SampleSpec,
    packet::{Body, Interface, Packet, PayloadId, Protocol, SenderId, SourcePacket},
};

const FRAME_LEN: usize = 480;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mono_48k() -> SampleSpec {
    SampleSpec::new(
        num::NonZeroU32::new(48_000).unwrap(),
        num::NonZeroU16::new(1).unwrap(),
    )
}

/// Deterministic passthrough configuration: mono, resampler bypassed,
/// supervision windows far beyond test length.
fn passthrough_config() -> ReceiverConfig {
    ReceiverConfig {
        output: mono_48k(),
        quantum_frames: num::NonZeroUsize::new(FRAME_LEN).unwrap(),
        session: SessionConfig {
            enable_resampling: false,
            no_playback_timeout: Duration::from_secs(600),
            broken_playback_timeout: Duration::from_secs(600),
            band_timeout: Duration::from_secs(600),
            latency_tolerance: Duration::from_secs(600),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn receiver(config: ReceiverConfig) -> ReceiverLoop {
    init_logs();
    ReceiverLoop::new(config, CodecMap::builtin()).unwrap()
}

fn sender() -> SenderId {
    SenderId {
        addr: "127.0.0.1:4455".parse().unwrap(),
        ssrc: 0x5151,
    }
}

/// The reference waveform: frame `seq` carries these exact samples.
fn reference_samples(seq: u64) -> Vec<f32> {
    (0..FRAME_LEN as u64)
        .map(|i| ((seq * FRAME_LEN as u64 + i) % 997) as f32 / 1000.)
        .collect()
}

fn source_struct(seq: u64) -> SourcePacket {
    SourcePacket {
        seq,
        timestamp: seq * FRAME_LEN as u64,
        payload_id: PayloadId::PCM_F32,
        payload: reference_samples(seq)
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect(),
    }
}

fn source_packet(from: SenderId, seq: u64) -> Packet {
    Packet {
        sender: from,
        rx_nanos: 0,
        body: Body::Source(source_struct(seq)),
    }
}

/// The parity packet protecting block `block_id` of the reference stream.
fn repair_packet(from: SenderId, block_id: u64, geometry: FecConfig) -> Packet {
    let start = block_id * geometry.n_source.get() as u64;
    let sources: Vec<SourcePacket> = (start..start + geometry.n_source.get() as u64)
        .map(source_struct)
        .collect();
    let parity = fec::encode_parity(&sources, geometry).remove(0);

    Packet {
        sender: from,
        rx_nanos: 0,
        body: Body::Repair(rill_proto::packet::RepairPacket {
            block_id,
            index: 0,
            n_source: geometry.n_source,
            n_repair: geometry.n_repair,
            parity,
        }),
    }
}

fn read_frame(rx: &mut ReceiverLoop) -> Frame {
    let mut frame = Frame::silent(rx.sample_spec(), FRAME_LEN);
    assert!(rx.read(&mut frame));
    frame
}

fn create_source_stream(
    rx: &ReceiverLoop,
) -> (
    rill_pipeline::SlotHandle,
    rill_pipeline::EndpointWriter,
) {
    let handle = rx.handle();
    let slot = handle
        .schedule_and_wait(Task::CreateSlot)
        .unwrap()
        .into_slot()
        .unwrap();
    let writer = handle
        .schedule_and_wait(Task::CreateEndpoint {
            slot,
            iface: Interface::AudioSource,
            proto: Protocol::Pcm,
        })
        .unwrap()
        .into_writer()
        .unwrap();
    (slot, writer)
}

// S1
#[test]
fn lossless_passthrough_is_bit_exact() {
    let mut rx = receiver(passthrough_config());
    let (_slot, mut writer) = create_source_stream(&rx);

    for seq in 0..100 {
        writer.write(source_packet(sender(), seq)).unwrap();
    }

    for seq in 0..100 {
        let frame = read_frame(&mut rx);
        assert_eq!(frame.samples(), reference_samples(seq), "frame {seq}");
        assert!(frame.flags().is_clean(), "frame {seq} flagged");
        assert_eq!(frame.position(), seq * FRAME_LEN as u64);
    }
    assert_eq!(rx.state(), SourceState::Playing);
}

// S2
#[test]
fn single_loss_is_repaired_bit_exact() {
    let mut rx = receiver(passthrough_config());
    let (slot, mut writer) = create_source_stream(&rx);

    let handle = rx.handle();
    let mut repair_writer = handle
        .schedule_and_wait(Task::CreateEndpoint {
            slot,
            iface: Interface::AudioRepair,
            proto: Protocol::Parity,
        })
        .unwrap()
        .into_writer()
        .unwrap();

    let geometry = passthrough_config().session.fec;
    for seq in (0..20).filter(|&s| s != 10) {
        writer.write(source_packet(sender(), seq)).unwrap();
    }
    repair_writer
        .write(repair_packet(sender(), 0, geometry))
        .unwrap();

    for seq in 0..20 {
        let frame = read_frame(&mut rx);
        assert_eq!(frame.samples(), reference_samples(seq), "frame {seq}");
        assert!(!frame.flags().drops, "frame {seq} flagged drops");
    }
}

// S3
#[test]
fn unrecoverable_loss_plays_flagged_silence() {
    let mut rx = receiver(passthrough_config());
    let (_slot, mut writer) = create_source_stream(&rx);

    for seq in (0..20).filter(|&s| s != 10) {
        writer.write(source_packet(sender(), seq)).unwrap();
    }

    for seq in 0..20 {
        let frame = read_frame(&mut rx);
        if seq == 10 {
            assert!(frame.samples().iter().all(|&s| s == 0.), "frame 10 not silent");
            assert!(frame.flags().drops, "frame 10 not flagged");
        } else {
            assert_eq!(frame.samples(), reference_samples(seq), "frame {seq}");
            assert!(frame.flags().is_clean(), "frame {seq} flagged");
        }
    }
}

// S4
#[test]
fn starved_session_is_reaped_and_source_goes_idle() {
    let mut config = passthrough_config();
    // 960 frames of stream time
    config.session.no_playback_timeout = Duration::from_millis(20);
    config.session.broken_playback_timeout = Duration::from_millis(20);

    let mut rx = receiver(config);
    let (_slot, mut writer) = create_source_stream(&rx);

    writer.write(source_packet(sender(), 0)).unwrap();

    let frame = read_frame(&mut rx);
    assert_eq!(frame.samples(), reference_samples(0));
    assert_eq!(rx.state(), SourceState::Playing);

    // starve until the watchdog fires and the session is reaped
    let mut reads = 0;
    while rx.state() == SourceState::Playing {
        let frame = read_frame(&mut rx);
        assert!(frame.samples().iter().all(|&s| s == 0.));
        reads += 1;
        assert!(reads < 10, "session never reaped");
    }
    assert_eq!(rx.state(), SourceState::Idle);

    // and it stays gone
    let frame = read_frame(&mut rx);
    assert!(frame.samples().iter().all(|&s| s == 0.));
    assert_eq!(rx.state(), SourceState::Idle);
}

// S5
#[test]
fn concurrent_control_tasks_do_not_disturb_audio() {
    let mut rx = receiver(passthrough_config());
    let (_slot, mut writer) = create_source_stream(&rx);
    let handle = rx.handle();

    for seq in 0..100 {
        writer.write(source_packet(sender(), seq)).unwrap();
    }

    let submitter = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            for _ in 0..30 {
                let slot = handle
                    .schedule_and_wait(Task::CreateSlot)
                    .unwrap()
                    .into_slot()
                    .unwrap();
                handle
                    .schedule_and_wait(Task::CreateEndpoint {
                        slot,
                        iface: Interface::AudioControl,
                        proto: Protocol::Control,
                    })
                    .unwrap();
                handle
                    .schedule_and_wait(Task::DeleteSlot { slot })
                    .unwrap();
            }
        })
    };

    for seq in 0..100 {
        let frame = read_frame(&mut rx);
        assert_eq!(frame.samples(), reference_samples(seq), "frame {seq}");
        assert!(frame.flags().is_clean(), "frame {seq} flagged");
    }

    // keep the audio thread spinning until every task went through
    while !submitter.is_finished() {
        read_frame(&mut rx);
    }
    submitter.join().unwrap();
    assert_eq!(handle.n_pending_tasks(), 0);
}

// S6
#[test]
fn slots_are_isolated() {
    let mut rx = receiver(passthrough_config());
    let (slot_a, mut writer_a) = create_source_stream(&rx);
    let handle = rx.handle();

    let slot_b = handle
        .schedule_and_wait(Task::CreateSlot)
        .unwrap()
        .into_slot()
        .unwrap();
    let mut writer_b = handle
        .schedule_and_wait(Task::CreateEndpoint {
            slot: slot_b,
            iface: Interface::AudioSource,
            proto: Protocol::Pcm,
        })
        .unwrap()
        .into_writer()
        .unwrap();

    let sender_b = SenderId {
        addr: "127.0.0.2:4456".parse().unwrap(),
        ssrc: 0xb0b,
    };

    // A plays the reference stream, B a constant -0.25
    for seq in 0..20 {
        writer_a.write(source_packet(sender(), seq)).unwrap();
    }
    for seq in 0..40 {
        writer_b
            .write(Packet {
                sender: sender_b,
                rx_nanos: 0,
                body: Body::Source(SourcePacket {
                    seq,
                    timestamp: seq * FRAME_LEN as u64,
                    payload_id: PayloadId::PCM_F32,
                    payload: [-0.25f32; FRAME_LEN]
                        .iter()
                        .flat_map(|s| s.to_le_bytes())
                        .collect(),
                }),
            })
            .unwrap();
    }

    for seq in 0..20 {
        let frame = read_frame(&mut rx);
        let reference = reference_samples(seq);
        for (i, &s) in frame.samples().iter().enumerate() {
            assert_eq!(s, reference[i] - 0.25, "frame {seq} sample {i}");
        }
    }

    // deleting A leaves B's output untouched
    handle
        .schedule_and_wait(Task::DeleteSlot { slot: slot_a })
        .unwrap();
    assert_eq!(
        writer_a.write(source_packet(sender(), 100)).err(),
        Some(WriteError::EndpointGone)
    );

    for _ in 20..40 {
        let frame = read_frame(&mut rx);
        assert!(frame.samples().iter().all(|&s| s == -0.25));
    }
    assert_eq!(rx.state(), SourceState::Playing);
}

#[test]
fn pre_stream_reads_are_flagged_silence_until_packets_arrive() {
    let mut rx = receiver(passthrough_config());
    let (_slot, mut writer) = create_source_stream(&rx);

    // session does not even exist yet
    let frame = read_frame(&mut rx);
    assert!(frame.samples().iter().all(|&s| s == 0.));
    assert_eq!(rx.state(), SourceState::Idle);

    for seq in 0..4 {
        writer.write(source_packet(sender(), seq)).unwrap();
    }
    for seq in 0..4 {
        let frame = read_frame(&mut rx);
        assert_eq!(frame.samples(), reference_samples(seq));
        assert!(frame.flags().is_clean());
    }

    // stream stops: filler is incomplete, not drops
    let frame = read_frame(&mut rx);
    assert!(frame.flags().incomplete);
    assert!(!frame.flags().drops);
}

#[test]
fn slot_create_then_delete_restores_the_initial_state() {
    let mut rx = receiver(passthrough_config());
    let handle = rx.handle();

    assert_eq!(rx.state(), SourceState::Idle);

    let (slot, mut writer) = create_source_stream(&rx);
    writer.write(source_packet(sender(), 0)).unwrap();
    read_frame(&mut rx);
    assert_eq!(rx.state(), SourceState::Playing);

    handle.schedule_and_wait(Task::DeleteSlot { slot }).unwrap();

    assert_eq!(rx.state(), SourceState::Idle);
    let frame = read_frame(&mut rx);
    assert!(frame.samples().iter().all(|&s| s == 0.));
    assert_eq!(writer.write(source_packet(sender(), 1)).err(), Some(WriteError::EndpointGone));
}

#[test]
fn pause_and_restart_semantics() {
    let mut rx = receiver(passthrough_config());
    let (_slot, mut writer) = create_source_stream(&rx);

    for seq in 0..4 {
        writer.write(source_packet(sender(), seq)).unwrap();
    }
    let frame = read_frame(&mut rx);
    assert_eq!(frame.samples(), reference_samples(0));

    rx.pause();
    assert_eq!(rx.state(), SourceState::Paused);
    let frame = read_frame(&mut rx);
    assert!(frame.samples().iter().all(|&s| s == 0.));

    assert!(rx.resume());
    let frame = read_frame(&mut rx);
    assert_eq!(frame.samples(), reference_samples(1));

    // restart clears sessions and rewinds the stream clock
    assert!(rx.restart());
    assert_eq!(rx.state(), SourceState::Idle);
    let frame = read_frame(&mut rx);
    assert_eq!(frame.position(), 0);
    assert!(frame.samples().iter().all(|&s| s == 0.));
}

#[test]
fn resampled_session_produces_continuous_audio() {
    let mut config = passthrough_config();
    config.session.enable_resampling = true;

    let mut rx = receiver(config);
    let (_slot, mut writer) = create_source_stream(&rx);

    for seq in 0..50 {
        writer.write(source_packet(sender(), seq)).unwrap();
    }

    let mut nonsilent_frames = 0;
    for _ in 0..40 {
        let frame = read_frame(&mut rx);
        assert!(frame.samples().iter().all(|s| s.is_finite()));
        if frame.samples().iter().any(|&s| s != 0.) {
            nonsilent_frames += 1;
        }
    }
    assert!(nonsilent_frames > 30, "resampled stream mostly silent");
}
