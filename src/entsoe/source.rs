use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entsoe::SourceError;
use crate::entsoe::areas::ZoneDescriptor;
use crate::generation::RawTable;
use crate::series::RawSeries;

/// Provider of raw market data for a zone and UTC period.
///
/// Every call either yields a raw, not yet normalized response or fails;
/// callers decide how a failure degrades.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn day_ahead_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError>;

    async fn load(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError>;

    async fn imbalance_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError>;

    async fn imbalance_volumes(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError>;

    async fn generation(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawTable, SourceError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Canned answer of a fake query
    #[derive(Clone)]
    pub(crate) enum Reply<T> {
        Data(T),
        NoData,
        Unreachable,
        Unauthorized,
    }

    impl<T: Clone> Reply<T> {
        fn get(&self) -> Result<T, SourceError> {
            match self {
                Reply::Data(value) => Ok(value.clone()),
                Reply::NoData => Err(SourceError::NoData),
                Reply::Unreachable => {
                    Err(SourceError::InvalidResponse("connection refused".into()))
                }
                Reply::Unauthorized => Err(SourceError::Unauthorized),
            }
        }
    }

    /// Answers every window with the same canned replies and counts calls
    pub(crate) struct FakeSource {
        pub prices: Reply<RawSeries>,
        pub load: Reply<RawSeries>,
        pub imbalance_prices: Reply<RawSeries>,
        pub imbalance_volumes: Reply<RawSeries>,
        pub generation: Reply<RawTable>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn unreachable() -> Self {
            Self {
                prices: Reply::Unreachable,
                load: Reply::Unreachable,
                imbalance_prices: Reply::Unreachable,
                imbalance_volumes: Reply::Unreachable,
                generation: Reply::Unreachable,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn record(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        async fn day_ahead_prices(
            &self,
            _zone: &ZoneDescriptor,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<RawSeries, SourceError> {
            self.record();
            self.prices.get()
        }

        async fn load(
            &self,
            _zone: &ZoneDescriptor,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<RawSeries, SourceError> {
            self.record();
            self.load.get()
        }

        async fn imbalance_prices(
            &self,
            _zone: &ZoneDescriptor,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<RawSeries, SourceError> {
            self.record();
            self.imbalance_prices.get()
        }

        async fn imbalance_volumes(
            &self,
            _zone: &ZoneDescriptor,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<RawSeries, SourceError> {
            self.record();
            self.imbalance_volumes.get()
        }

        async fn generation(
            &self,
            _zone: &ZoneDescriptor,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<RawTable, SourceError> {
            self.record();
            self.generation.get()
        }
    }
}
