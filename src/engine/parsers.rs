use ciborium::Value;
use tracing::{debug, warn};

use crate::codec::PayloadView;
use crate::command::{Command, Outcome, Reply};
use crate::error::NewtError;
use crate::model::{Image, StatDetails, TaskStats};
use crate::protocol::ReturnCode;

/// Checks the device result code in `rc`.
///
/// When `mandatory` is false, a missing or unrecognised code is accepted:
/// older firmware omits `rc` on pure reads.
pub(crate) fn verify_response_code(
    payload: &PayloadView<'_>,
    mandatory: bool,
) -> Result<(), NewtError> {
    let Some(raw) = payload.field("rc").as_integer() else {
        if mandatory {
            debug!("response is missing its result code");
            return Err(NewtError::ReceivedResponseMissingFields);
        }
        return Ok(());
    };

    let code = u16::try_from(raw)
        .ok()
        .and_then(|raw| ReturnCode::try_from(raw).ok());
    let Some(code) = code else {
        if mandatory {
            debug!(rc = %raw, "response carries an unknown result code");
            return Err(NewtError::ReceivedResponseInvalidValues);
        }
        warn!(rc = %raw, "ignoring unknown result code");
        return Ok(());
    };

    if code != ReturnCode::Ok {
        debug!(%code, description = code.description(), "device reported failure");
        return Err(NewtError::ReceivedResultNotOk(
            code.description().to_owned(),
        ));
    }

    Ok(())
}

/// Parses the reply to any command except upload.
pub(crate) fn parse_reply(command: &Command, payload: &Value) -> Outcome {
    let view = PayloadView::new(payload);
    verify_response_code(&view, false)?;

    let reply = match command {
        Command::ImageList | Command::ImageTest { .. } | Command::ImageConfirm { .. } => {
            Reply::Images(parse_images(&view))
        }
        Command::Echo { .. } => Reply::Echo(view.text("r")),
        Command::TaskStats => Reply::TaskStats(parse_task_stats(&view)),
        Command::Stats => Reply::StatGroups(
            view.field("stat_list")
                .elements()
                .iter()
                .map(PayloadView::as_text)
                .collect(),
        ),
        Command::StatDetails { .. } => Reply::StatDetails(parse_stat_details(&view)),
        Command::Reset => Reply::Done,
        Command::Upload { .. } => return Err(NewtError::Internal),
    };

    Ok(reply)
}

/// Returns the offset the device has accepted so far.
pub(crate) fn parse_upload_ack(payload: &Value) -> Result<usize, NewtError> {
    let view = PayloadView::new(payload);
    verify_response_code(&view, true)?;
    Ok(usize::try_from(view.uint("off")).unwrap_or(usize::MAX))
}

fn parse_images(view: &PayloadView<'_>) -> Vec<Image> {
    view.field("images")
        .elements()
        .iter()
        .map(|image| {
            Image::builder()
                .slot(image.uint("slot"))
                .version(image.text("version"))
                .confirmed(image.boolean("confirmed"))
                .pending(image.boolean("pending"))
                .active(image.boolean("active"))
                .bootable(image.boolean("bootable"))
                .hash(image.bytes("hash"))
                .build()
        })
        .collect()
}

fn parse_task_stats(view: &PayloadView<'_>) -> Vec<TaskStats> {
    view.field("tasks")
        .entries()
        .into_iter()
        .map(|(name, task)| {
            TaskStats::builder()
                .name(name)
                .task_id(task.uint("tid"))
                .priority(task.uint("prio"))
                .state(task.uint("state"))
                .run_time(task.uint("runtime"))
                .context_switch_count(task.uint("cswcnt"))
                .stack_size(task.uint("stksiz"))
                .stack_used(task.uint("stkuse"))
                .last_sanity_checkin(task.uint("last_checkin"))
                .next_sanity_checkin(task.uint("next_checkin"))
                .build()
        })
        .collect()
}

fn parse_stat_details(view: &PayloadView<'_>) -> Vec<StatDetails> {
    view.field("fields")
        .entries()
        .into_iter()
        .map(|(name, value)| StatDetails::from((name, value.as_uint())))
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ciborium::value::Integer;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::codec::PayloadMap;

    fn with_rc(rc: i64) -> Value {
        PayloadMap::new()
            .value("rc", Value::Integer(Integer::from(rc)))
            .into_value()
    }

    #[rstest]
    #[case(1, "Unknown Error: Command might not be supported")]
    #[case(2, "Out of memory")]
    #[case(3, "Device is in invalid state")]
    #[case(5, "Enoent")]
    fn known_failure_codes_carry_their_description(#[case] rc: i64, #[case] expected: &str) {
        let value = with_rc(rc);
        assert_eq!(
            Err(NewtError::ReceivedResultNotOk(expected.to_owned())),
            verify_response_code(&PayloadView::new(&value), false)
        );
    }

    #[rstest]
    #[case(false, Ok(()))]
    #[case(true, Err(NewtError::ReceivedResponseMissingFields))]
    fn missing_code_depends_on_mandatory(
        #[case] mandatory: bool,
        #[case] expected: Result<(), NewtError>,
    ) {
        let value = PayloadMap::new().into_value();
        assert_eq!(
            expected,
            verify_response_code(&PayloadView::new(&value), mandatory)
        );
    }

    #[rstest]
    #[case(6)]
    #[case(-1)]
    #[case(70_000)]
    fn unknown_code_is_tolerated_unless_mandatory(#[case] rc: i64) {
        let value = with_rc(rc);
        let view = PayloadView::new(&value);
        assert_eq!(Ok(()), verify_response_code(&view, false));
        assert_eq!(
            Err(NewtError::ReceivedResponseInvalidValues),
            verify_response_code(&view, true)
        );
    }

    #[test]
    fn image_list_reads_every_slot() {
        let image = |slot: u64, version: &str, active: bool| {
            PayloadMap::new()
                .uint("slot", slot)
                .text("version", version)
                .boolean("confirmed", active)
                .boolean("active", active)
                .boolean("bootable", true)
                .bytes("hash", vec![slot as u8; 4])
                .into_value()
        };
        let value = PayloadMap::new()
            .value(
                "images",
                Value::Array(vec![image(0, "1.0.0", true), image(1, "1.1.0", false)]),
            )
            .into_value();

        let reply = parse_reply(&Command::ImageList, &value).expect("image list should parse");
        let images = match reply {
            Reply::Images(images) => images,
            other => panic!("expected image reply, got {other:?}"),
        };
        assert_eq!(2, images.len());
        assert_eq!("1.1.0", images[1].version());
        assert!(images[0].is_active());
        assert!(!images[1].is_confirmed());
        assert!(!images[1].is_pending());
        assert_eq!(&[1, 1, 1, 1], images[1].hash());
    }

    #[test]
    fn task_stats_are_keyed_by_task_name() {
        let task = PayloadMap::new()
            .uint("tid", 3)
            .uint("prio", 10)
            .uint("state", 1)
            .uint("runtime", 500)
            .uint("cswcnt", 42)
            .uint("stksiz", 256)
            .uint("stkuse", 100)
            .uint("last_checkin", 7)
            .uint("next_checkin", 9)
            .into_value();
        let value = PayloadMap::new()
            .uint("rc", 0)
            .value("tasks", PayloadMap::new().value("main", task).into_value())
            .into_value();

        let reply = parse_reply(&Command::TaskStats, &value).expect("task stats should parse");
        assert_eq!(
            Reply::TaskStats(vec![
                TaskStats::builder()
                    .name("main")
                    .task_id(3)
                    .priority(10)
                    .state(1)
                    .run_time(500)
                    .context_switch_count(42)
                    .stack_size(256)
                    .stack_used(100)
                    .last_sanity_checkin(7)
                    .next_sanity_checkin(9)
                    .build()
            ]),
            reply
        );
    }

    #[test]
    fn stat_groups_and_details_parse() {
        let list = PayloadMap::new()
            .value(
                "stat_list",
                Value::Array(vec![Value::Text("ble_phy".into()), Value::Text("os".into())]),
            )
            .into_value();
        assert_eq!(
            Ok(Reply::StatGroups(vec!["ble_phy".into(), "os".into()])),
            parse_reply(&Command::Stats, &list)
        );

        let details = PayloadMap::new()
            .value(
                "fields",
                PayloadMap::new().uint("tx_good", 12).uint("rx_bad", 1).into_value(),
            )
            .into_value();
        assert_eq!(
            Ok(Reply::StatDetails(vec![
                StatDetails::new("tx_good", 12),
                StatDetails::new("rx_bad", 1),
            ])),
            parse_reply(
                &Command::StatDetails {
                    group: "ble_phy".into()
                },
                &details
            )
        );
    }

    #[test]
    fn echo_and_reset_parse() {
        let echo = PayloadMap::new().text("r", "hello").into_value();
        assert_eq!(
            Ok(Reply::Echo("hello".into())),
            parse_reply(
                &Command::Echo {
                    message: "hello".into()
                },
                &echo
            )
        );
        assert_eq!(
            Ok(Reply::Done),
            parse_reply(&Command::Reset, &PayloadMap::new().into_value())
        );
    }

    #[test]
    fn failing_code_wins_over_payload_fields() {
        let value = PayloadMap::new()
            .uint("rc", 2)
            .text("r", "ignored")
            .into_value();
        assert_matches!(
            parse_reply(&Command::Echo { message: "x".into() }, &value),
            Err(NewtError::ReceivedResultNotOk(description)) if description == "Out of memory"
        );
    }

    #[test]
    fn upload_ack_requires_result_code() {
        let without_rc = PayloadMap::new().uint("off", 146).into_value();
        assert_eq!(
            Err(NewtError::ReceivedResponseMissingFields),
            parse_upload_ack(&without_rc)
        );

        let ack = PayloadMap::new().uint("rc", 0).uint("off", 146).into_value();
        assert_eq!(Ok(146), parse_upload_ack(&ack));
    }
}
