//!  Skyfare Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Flight Store
//!
//! Persists normalized flights and their prices. Reference data (airlines,
//! airports) is owned elsewhere and read here once per store lifetime to
//! resolve IATA codes to row ids; unknown codes skip the flight with a
//! warning. Writes are append-only: one transaction per `store_flights`
//! call, no upsert semantics.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::schemas::NormalizedFlight;

#[derive(Debug)]
struct ReferenceCaches {
    airlines: HashMap<String, Uuid>,
    airports: HashMap<String, Uuid>,
}

pub struct FlightStore {
    pool: PgPool,
    caches: OnceCell<ReferenceCaches>,
}

impl FlightStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            caches: OnceCell::new(),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connect to flight database")?;
        Ok(Self::new(pool))
    }

    /// IATA-code → id maps, warmed on first use.
    async fn caches(&self) -> Result<&ReferenceCaches> {
        self.caches
            .get_or_try_init(|| async {
                let airlines = Self::load_code_map(&self.pool, "SELECT code, id FROM airlines")
                    .await
                    .context("warm airline cache")?;
                let airports = Self::load_code_map(&self.pool, "SELECT code, id FROM airports")
                    .await
                    .context("warm airport cache")?;
                tracing::debug!(
                    "Reference cache warmed: {} airlines, {} airports",
                    airlines.len(),
                    airports.len()
                );
                Ok(ReferenceCaches { airlines, airports })
            })
            .await
    }

    async fn load_code_map(pool: &PgPool, query: &str) -> Result<HashMap<String, Uuid>> {
        let rows = sqlx::query(query).fetch_all(pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("code"), row.get::<Uuid, _>("id")))
            .collect())
    }

    /// Persist flights and their prices in one transaction. Returns the
    /// number of flights stored (skipped rows are not counted).
    pub async fn store_flights(&self, flights: &[NormalizedFlight]) -> Result<u64> {
        let caches = self.caches().await?;

        let mut tx = self.pool.begin().await.context("begin transaction")?;
        let mut stored: u64 = 0;

        for nf in flights {
            let Some(airline_id) = caches.airlines.get(&nf.airline_code) else {
                tracing::warn!(
                    "Unknown airline code {}, skipping flight {}",
                    nf.airline_code,
                    nf.flight_number
                );
                continue;
            };
            let Some(origin_id) = caches.airports.get(&nf.origin) else {
                tracing::warn!(
                    "Unknown airport code {}, skipping flight {}",
                    nf.origin,
                    nf.flight_number
                );
                continue;
            };
            let Some(dest_id) = caches.airports.get(&nf.destination) else {
                tracing::warn!(
                    "Unknown airport code {}, skipping flight {}",
                    nf.destination,
                    nf.flight_number
                );
                continue;
            };

            let flight_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO flights \
                 (id, airline_id, flight_number, origin_airport_id, destination_airport_id, \
                  departure_time, arrival_time, duration_minutes, aircraft_type, cabin_class, \
                  stops, source, crawled_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(flight_id)
            .bind(airline_id)
            .bind(&nf.flight_number)
            .bind(origin_id)
            .bind(dest_id)
            .bind(nf.departure_time)
            .bind(nf.arrival_time)
            .bind(nf.duration_minutes as i32)
            .bind(&nf.aircraft_type)
            .bind(nf.cabin_class.as_str_name())
            .bind(nf.stops as i32)
            .bind(nf.source.as_str_name())
            .bind(nf.crawled_at)
            .execute(&mut *tx)
            .await
            .context("insert flight row")?;

            for np in &nf.prices {
                sqlx::query(
                    "INSERT INTO prices \
                     (id, flight_id, price_amount, currency, fare_class, includes_baggage, \
                      includes_meal, seat_selection_included, booking_url, source, crawled_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                )
                .bind(Uuid::new_v4())
                .bind(flight_id)
                .bind(np.amount)
                .bind(&np.currency)
                .bind(&np.fare_class)
                .bind(np.includes_baggage)
                .bind(np.includes_meal)
                .bind(np.seat_selection_included)
                .bind(&np.booking_url)
                .bind(np.source.as_str_name())
                .bind(np.crawled_at)
                .execute(&mut *tx)
                .await
                .context("insert price row")?;
            }

            stored += 1;
        }

        tx.commit().await.context("commit flight batch")?;
        tracing::info!("Stored {stored} flights");
        Ok(stored)
    }
}
