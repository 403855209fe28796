//! Query-string parsing into store filters.
//!
//! 不正な値は `FilterError`（400）。未知のキーは無視します。

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::domain::FilterError;
use crate::ports::{DEFAULT_LIMIT, MAX_LIMIT, ScheduleFilter, TaskFilter};

pub(crate) struct Params(HashMap<String, String>);

impl Params {
    pub(crate) fn new(raw: HashMap<String, String>) -> Self {
        Self(raw)
    }

    pub(crate) fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub(crate) fn parse<T>(&self, key: &str) -> Result<Option<T>, FilterError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| FilterError::new(key, format!("`{raw}`: {e}")))
            })
            .transpose()
    }

    pub(crate) fn pagination(&self) -> Result<(usize, usize), FilterError> {
        let offset = self.parse::<usize>("offset")?.unwrap_or(0);
        let limit = self.parse::<usize>("limit")?.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(FilterError::new(
                "limit",
                format!("must be between 1 and {MAX_LIMIT}"),
            ));
        }
        Ok((offset, limit))
    }

    pub(crate) fn task_filter(&self) -> Result<TaskFilter, FilterError> {
        let (offset, limit) = self.pagination()?;
        let filter = TaskFilter {
            scheduler_id: self.string("scheduler_id"),
            organisation: self.string("organisation"),
            status: self.parse("status")?,
            kind: self.parse("type")?,
            hash: self.string("hash"),
            min_created_at: self.parse("min_created_at")?,
            max_created_at: self.parse("max_created_at")?,
            offset,
            limit,
        };
        ordered("created_at", filter.min_created_at, filter.max_created_at)?;
        Ok(filter)
    }

    pub(crate) fn schedule_filter(&self) -> Result<ScheduleFilter, FilterError> {
        let (offset, limit) = self.pagination()?;
        let filter = ScheduleFilter {
            scheduler_id: self.string("scheduler_id"),
            organisation: self.string("organisation"),
            enabled: self.parse("enabled")?,
            hash: self.string("hash"),
            min_deadline_at: self.parse("min_deadline_at")?,
            max_deadline_at: self.parse("max_deadline_at")?,
            offset,
            limit,
        };
        ordered("deadline_at", filter.min_deadline_at, filter.max_deadline_at)?;
        Ok(filter)
    }
}

fn ordered<T: PartialOrd>(field: &str, min: Option<T>, max: Option<T>) -> Result<(), FilterError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(FilterError::new(
            format!("min_{field}"),
            format!("must not be after max_{field}"),
        )),
        _ => Ok(()),
    }
}
