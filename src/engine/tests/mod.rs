use super::test_helpers::*;
use super::*;
use crate::types::{
    BatchSummary, CacheEntry, DocumentId, Event, ItemOutcome, ItemSource, PageId, ProcessingState,
    RunStatus,
};
use crate::error::Error;
use crate::store::{CacheStore, HistoryStore};
use std::time::Duration;
