use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio_stream::StreamExt;

use newtmgr::{
    Command, EngineConfig, NewtError, NewtManager, PacketCodec, PayloadView, ProgressDecision,
    RecordingTransport, Reply, ReturnCode, SimulatedDevice, UploadAck, decode_payload,
};

fn pump(
    manager: &mut NewtManager<RecordingTransport>,
    transport: &RecordingTransport,
    device: &mut SimulatedDevice,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut exchanged = Vec::new();
    loop {
        let written = transport.take_written();
        if written.is_empty() {
            return Ok(exchanged);
        }
        for request in written {
            for fragment in device.respond(&request)? {
                manager.on_data_received(Ok(&fragment));
            }
            exchanged.push(request);
        }
    }
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|index| (index * 7 % 256) as u8).collect()
}

/// Image bytes carried by each recorded chunk.
fn chunk_lengths(exchanged: &[Vec<u8>]) -> anyhow::Result<Vec<usize>> {
    exchanged
        .iter()
        .map(|bytes| -> anyhow::Result<usize> {
            let packet = PacketCodec::decode(bytes)?.into_packet();
            let body = decode_payload(packet.payload())?;
            Ok(PayloadView::new(&body).bytes("data").len())
        })
        .collect()
}

#[rstest]
#[case(299, vec![146, 153])]
#[case(306, vec![146, 153, 7])]
#[case(32, vec![32])]
fn upload_is_split_into_chunks(
    #[case] len: usize,
    #[case] expected: Vec<usize>,
) -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();
    let image = firmware(len);

    let mut handle = manager.send_request(Command::Upload {
        image: image.clone(),
    });
    let exchanged = pump(&mut manager, &transport, &mut device)?;

    assert_eq!(expected, chunk_lengths(&exchanged)?);
    assert_eq!(Some(Ok(Reply::Done)), handle.try_outcome());
    assert_eq!(image, device.uploaded());
    assert_eq!(1.0, handle.progress());
    Ok(())
}

#[test]
fn only_first_chunk_carries_image_length() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();

    let _handle = manager.send_request(Command::Upload {
        image: firmware(306),
    });
    let exchanged = pump(&mut manager, &transport, &mut device)?;

    let lengths = exchanged
        .iter()
        .map(|bytes| -> anyhow::Result<(u64, Option<u64>)> {
            let packet = PacketCodec::decode(bytes)?.into_packet();
            let body = decode_payload(packet.payload())?;
            let view = PayloadView::new(&body);
            Ok((view.uint("off"), view.field("len").is_present().then(|| view.uint("len"))))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    assert_eq!(vec![(0, Some(306)), (146, None), (299, None)], lengths);

    let seqs: Vec<u8> = exchanged.iter().map(|bytes| bytes[6]).collect();
    assert_eq!(vec![0, 1, 2], seqs);
    Ok(())
}

#[test]
fn progress_is_reported_before_each_chunk() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = Arc::clone(&seen);
    let mut handle = manager.send_request_with_progress(
        Command::Upload {
            image: firmware(306),
        },
        move |fraction: f32| {
            recorder
                .lock()
                .expect("progress log lock")
                .push(fraction);
            ProgressDecision::Continue
        },
    );
    pump(&mut manager, &transport, &mut device)?;

    assert_eq!(Some(Ok(Reply::Done)), handle.try_outcome());
    let seen = seen.lock().expect("progress log lock").clone();
    assert_eq!(
        vec![0.0, 146.0 / 306.0, 299.0 / 306.0, 1.0],
        seen
    );
    Ok(())
}

#[test]
fn progress_callback_cancels_at_chunk_boundary() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();

    let mut handle = manager.send_request_with_progress(
        Command::Upload {
            image: firmware(306),
        },
        |fraction: f32| fraction > 0.9,
    );
    let exchanged = pump(&mut manager, &transport, &mut device)?;

    assert_eq!(2, exchanged.len());
    assert_eq!(Some(Err(NewtError::UserCancelled)), handle.try_outcome());
    assert_eq!(299, device.uploaded().len());
    Ok(())
}

#[test]
fn handle_cancel_stops_transfer_and_next_request_runs() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();

    let mut upload = manager.send_request(Command::Upload {
        image: firmware(306),
    });
    let mut reset = manager.send_request(Command::Reset);
    upload.cancel();

    let exchanged = pump(&mut manager, &transport, &mut device)?;

    assert_eq!(2, exchanged.len());
    assert_eq!(Some(Err(NewtError::UserCancelled)), upload.try_outcome());
    assert_eq!(Some(Ok(Reply::Done)), reset.try_outcome());
    Ok(())
}

#[rstest]
#[case(0)]
#[case(31)]
fn short_image_is_rejected_without_writing(#[case] len: usize) {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());

    let mut handle = manager.send_request(Command::Upload {
        image: firmware(len),
    });

    assert_eq!(Some(Err(NewtError::UpdateImageInvalid)), handle.try_outcome());
    assert!(transport.written().is_empty());
}

#[test]
fn ack_without_result_code_fails_upload() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder()
        .upload_ack(UploadAck::OmitResultCode)
        .build();

    let mut handle = manager.send_request(Command::Upload {
        image: firmware(200),
    });
    pump(&mut manager, &transport, &mut device)?;

    assert_eq!(
        Some(Err(NewtError::ReceivedResponseMissingFields)),
        handle.try_outcome()
    );
    Ok(())
}

#[test]
fn device_failure_code_fails_upload() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder()
        .return_code(ReturnCode::Inval)
        .build();

    let mut handle = manager.send_request(Command::Upload {
        image: firmware(200),
    });
    pump(&mut manager, &transport, &mut device)?;

    assert_matches!(
        handle.try_outcome(),
        Some(Err(NewtError::ReceivedResultNotOk(description)))
            if description == "Device is in invalid state"
    );
    Ok(())
}

#[test]
fn offset_past_end_finishes_upload() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder()
        .upload_ack(UploadAck::FixedOffset(10_000))
        .build();

    let mut handle = manager.send_request(Command::Upload {
        image: firmware(400),
    });
    let exchanged = pump(&mut manager, &transport, &mut device)?;

    assert_eq!(1, exchanged.len());
    assert_eq!(Some(Ok(Reply::Done)), handle.try_outcome());
    Ok(())
}

#[test]
fn configured_budget_changes_chunking() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let config = EngineConfig::from_json_str(r#"{"max_chunk_payload": 64, "first_chunk_reserve": 4}"#)?;
    let mut manager = NewtManager::with_config(transport.clone(), config)?;
    let mut device = SimulatedDevice::builder().build();

    let _handle = manager.send_request(Command::Upload {
        image: firmware(150),
    });
    let exchanged = pump(&mut manager, &transport, &mut device)?;

    assert_eq!(vec![60, 64, 26], chunk_lengths(&exchanged)?);
    Ok(())
}

#[tokio::test]
async fn progress_stream_ends_with_final_fraction() -> anyhow::Result<()> {
    let transport = RecordingTransport::default();
    let mut manager = NewtManager::new(transport.clone());
    let mut device = SimulatedDevice::builder().build();

    let handle = manager.send_request(Command::Upload {
        image: firmware(306),
    });
    let progress = handle.progress_stream();
    pump(&mut manager, &transport, &mut device)?;

    assert_eq!(Reply::Done, handle.outcome().await?);
    assert_eq!(vec![1.0], progress.collect::<Vec<f32>>().await);
    Ok(())
}
