//! Activity log stage: builds the `users` and `time` dimensions and the
//! playback events the fact table is joined from.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, Int32Array, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type, TimeUnit, TimestampMicrosecondType};
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use snafu::prelude::*;
use tracing::info;

use sparkify_core::error::ArrowSnafu;
use sparkify_core::storage::join_url;
use sparkify_core::{Session, Table, TableError, WriteSummary};

use crate::error::{PipelineError, ReadSnafu, TransformSnafu};
use crate::output::{OutputWriter, TIME, USERS};

/// Log files sit exactly three directories below `log_data/`.
pub const LOG_DATA_PATTERN: &str = "log_data/*/*/*.json";

/// Log columns of the `users` dimension and their output names.
pub const USER_COLUMNS: &[(&str, &str)] = &[
    ("userId", "user_id"),
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("gender", "gender"),
    ("level", "level"),
];

/// Column holding the event time in epoch milliseconds.
const TS_COLUMN: &str = "ts";
/// Derived event time column.
pub const START_TIME: &str = "start_time";

/// Type of `start_time`: whole seconds stored at microsecond precision.
pub fn start_time_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

/// Calendar columns of the `time` dimension, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalendarField {
    Hour,
    Day,
    Week,
    Month,
    Year,
    Weekday,
}

impl CalendarField {
    const ALL: [CalendarField; 6] = [
        CalendarField::Hour,
        CalendarField::Day,
        CalendarField::Week,
        CalendarField::Month,
        CalendarField::Year,
        CalendarField::Weekday,
    ];

    fn name(self) -> &'static str {
        match self {
            CalendarField::Hour => "hour",
            CalendarField::Day => "day",
            CalendarField::Week => "week",
            CalendarField::Month => "month",
            CalendarField::Year => "year",
            CalendarField::Weekday => "weekday",
        }
    }

    fn of(self, time: &DateTime<FixedOffset>) -> i32 {
        match self {
            CalendarField::Hour => time.hour() as i32,
            CalendarField::Day => time.day() as i32,
            CalendarField::Week => time.iso_week().week() as i32,
            CalendarField::Month => time.month() as i32,
            CalendarField::Year => time.year(),
            // 1 = Sunday ... 7 = Saturday
            CalendarField::Weekday => time.weekday().number_from_sunday() as i32,
        }
    }
}

/// Everything the fact stage needs from the log stage.
#[derive(Debug, Clone)]
pub struct EventsOutput {
    pub users: WriteSummary,
    pub time: WriteSummary,
    /// Playback events with `start_time` appended.
    pub events: Table,
    /// The `time` dimension as written.
    pub time_table: Table,
}

/// Keep only events whose `page` is exactly `playback_page`.
pub fn playback_events(events: &Table, playback_page: &str) -> Result<Table, TableError> {
    events.filter_eq("page", playback_page)
}

/// Renamed user columns with exact duplicate rows collapsed.
pub fn users_table(events: &Table) -> Result<Table, TableError> {
    events.select_as(USER_COLUMNS)?.distinct()
}

/// Append `start_time`: `ts` milliseconds floored to whole seconds.
///
/// A `ts` whose microsecond value does not fit in an i64 becomes null.
pub fn with_start_time(events: &Table) -> Result<Table, TableError> {
    let ts_index = events.schema().index_of(TS_COLUMN).map_err(|_| {
        TableError::ColumnNotFound {
            name: TS_COLUMN.to_string(),
            available: events.column_names(),
        }
    })?;

    events.with_column(START_TIME, start_time_type(), |batch| {
        let millis = cast(batch.column(ts_index), &DataType::Int64).context(ArrowSnafu)?;
        let seconds: TimestampMicrosecondArray = millis
            .as_primitive::<Int64Type>()
            .iter()
            .map(|ms| ms.and_then(|ms| ms.div_euclid(1000).checked_mul(1_000_000)))
            .collect();
        Ok(Arc::new(seconds.with_timezone("UTC")) as ArrayRef)
    })
}

/// Distinct `start_time` values with their calendar fields in `offset`.
pub fn time_table(events: &Table, offset: FixedOffset) -> Result<Table, TableError> {
    let mut time = events.select(&[START_TIME])?.distinct()?;

    for field in CalendarField::ALL {
        time = time.with_column(field.name(), DataType::Int32, |batch| {
            let start = batch.column(0).as_primitive::<TimestampMicrosecondType>();
            let values: Int32Array = start
                .iter()
                .map(|micros| {
                    micros
                        .and_then(DateTime::from_timestamp_micros)
                        .map(|t| field.of(&t.with_timezone(&offset)))
                })
                .collect();
            Ok(Arc::new(values) as ArrayRef)
        })?;
    }

    Ok(time)
}

/// Reads the activity log and writes the `users` and `time` tables.
pub struct EventLogTransformer<'a> {
    session: &'a Session,
    input_root: &'a str,
    playback_page: &'a str,
    utc_offset: FixedOffset,
    writer: &'a OutputWriter<'a>,
}

impl<'a> EventLogTransformer<'a> {
    pub fn new(
        session: &'a Session,
        input_root: &'a str,
        playback_page: &'a str,
        utc_offset: FixedOffset,
        writer: &'a OutputWriter<'a>,
    ) -> Self {
        Self {
            session,
            input_root,
            playback_page,
            utc_offset,
            writer,
        }
    }

    pub async fn run(&self) -> Result<EventsOutput, PipelineError> {
        let pattern = join_url(self.input_root, LOG_DATA_PATTERN);
        let raw = self
            .session
            .read_json(&pattern, None)
            .await
            .context(ReadSnafu { table: "log_data" })?;

        let events = playback_events(&raw, self.playback_page).context(TransformSnafu {
            table: "playback events",
        })?;
        info!(
            records = raw.num_rows(),
            playbacks = events.num_rows(),
            page = self.playback_page,
            "Filtered activity log"
        );

        let users = users_table(&events).context(TransformSnafu { table: USERS.name })?;
        let users = self.writer.write(&USERS, &users).await?;

        let events = with_start_time(&events).context(TransformSnafu { table: START_TIME })?;
        let time_table =
            time_table(&events, self.utc_offset).context(TransformSnafu { table: TIME.name })?;
        let time = self.writer.write(&TIME, &time_table).await?;

        Ok(EventsOutput {
            users,
            time,
            events,
            time_table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, RecordBatch, StringArray};
    use arrow::datatypes::{Field, Int32Type, Schema};

    fn events() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("page", DataType::Utf8, true),
            Field::new("userId", DataType::Utf8, true),
            Field::new("firstName", DataType::Utf8, true),
            Field::new("lastName", DataType::Utf8, true),
            Field::new("gender", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
            Field::new("ts", DataType::Int64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["NextSong", "Help", "NextSong", "NextSong"])),
            Arc::new(StringArray::from(vec!["10", "11", "10", "10"])),
            Arc::new(StringArray::from(vec!["Ann", "Bob", "Ann", "Ann"])),
            Arc::new(StringArray::from(vec!["Lee", "Kim", "Lee", "Lee"])),
            Arc::new(StringArray::from(vec!["F", "M", "F", "F"])),
            Arc::new(StringArray::from(vec!["free", "free", "free", "paid"])),
            Arc::new(Int64Array::from(vec![
                1541121934796,
                1541121934000,
                1541121934001,
                1541990217796,
            ])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        Table::try_new(schema, vec![batch]).unwrap()
    }

    fn int_column(table: &Table, name: &str) -> Vec<i32> {
        table
            .column(name)
            .unwrap()
            .as_primitive::<Int32Type>()
            .values()
            .to_vec()
    }

    #[test]
    fn test_filter_keeps_only_playbacks() {
        let filtered = playback_events(&events(), "NextSong").unwrap();
        assert_eq!(filtered.num_rows(), 3);
    }

    #[test]
    fn test_users_keep_level_changes() {
        let filtered = playback_events(&events(), "NextSong").unwrap();
        let users = users_table(&filtered).unwrap();

        assert_eq!(
            users.column_names(),
            vec!["user_id", "first_name", "last_name", "gender", "level"]
        );
        assert_eq!(users.num_rows(), 2);
    }

    #[test]
    fn test_start_time_floors_to_seconds() {
        let with_start = with_start_time(&events()).unwrap();
        let start = with_start.column(START_TIME).unwrap();
        let start = start.as_primitive::<TimestampMicrosecondType>();

        assert_eq!(start.data_type(), &start_time_type());
        assert_eq!(start.value(0), 1_541_121_934_000_000);
        assert_eq!(start.value(1), 1_541_121_934_000_000);
        assert_eq!(start.value(2), 1_541_121_934_000_000);
    }

    #[test]
    fn test_time_dimension_fields_utc() {
        let filtered = playback_events(&events(), "NextSong").unwrap();
        let time = time_table(&with_start_time(&filtered).unwrap(), FixedOffset::east_opt(0).unwrap())
            .unwrap();

        assert_eq!(
            time.column_names(),
            vec!["start_time", "hour", "day", "week", "month", "year", "weekday"]
        );
        // Two events share a second.
        assert_eq!(time.num_rows(), 2);

        // 2018-11-02T01:25:34Z, a Friday
        assert_eq!(int_column(&time, "hour")[0], 1);
        assert_eq!(int_column(&time, "day")[0], 2);
        assert_eq!(int_column(&time, "week")[0], 44);
        assert_eq!(int_column(&time, "month")[0], 11);
        assert_eq!(int_column(&time, "year")[0], 2018);
        assert_eq!(int_column(&time, "weekday")[0], 6);
    }

    #[test]
    fn test_time_dimension_respects_offset() {
        let filtered = playback_events(&events(), "NextSong").unwrap();
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let time = time_table(&with_start_time(&filtered).unwrap(), offset).unwrap();

        assert_eq!(int_column(&time, "hour")[0], 9);
    }

    #[test]
    fn test_out_of_range_ts_becomes_null() {
        let schema = Arc::new(Schema::new(vec![Field::new("ts", DataType::Int64, true)]));
        let ts: ArrayRef = Arc::new(Int64Array::from(vec![
            Some(9_300_000_000_000_000),
            Some(-9_300_000_000_000_000),
            Some(1541121934796),
            None,
        ]));
        let batch = RecordBatch::try_new(schema.clone(), vec![ts]).unwrap();
        let events = Table::try_new(schema, vec![batch]).unwrap();

        let with_start = with_start_time(&events).unwrap();
        let start = with_start.column(START_TIME).unwrap();
        let start = start.as_primitive::<TimestampMicrosecondType>();

        assert!(start.is_null(0));
        assert!(start.is_null(1));
        assert_eq!(start.value(2), 1_541_121_934_000_000);
        assert!(start.is_null(3));

        let time = time_table(&with_start, FixedOffset::east_opt(0).unwrap()).unwrap();
        assert_eq!(time.num_rows(), 2);
    }

    #[test]
    fn test_missing_ts_column() {
        let no_ts = events().drop_columns(&["ts"]).unwrap();
        let err = with_start_time(&no_ts).unwrap_err();
        assert!(matches!(err, TableError::ColumnNotFound { name, .. } if name == "ts"));
    }
}
