use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{Block, BlockBatch, InputKey};
use crate::store::Store;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

pub const EXPECTED_TABLES: [&str; 4] = ["blocks", "txs", "txout", "txin"];

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        height BIGINT PRIMARY KEY,
        hash VARCHAR(64) NOT NULL UNIQUE,
        prevhash VARCHAR(64) NOT NULL,
        nexthash VARCHAR(64) NOT NULL,
        merkleroot VARCHAR(64) NOT NULL,
        time TIMESTAMPTZ NOT NULL,
        bits VARCHAR(16) NOT NULL,
        nonce BIGINT NOT NULL,
        size BIGINT NOT NULL,
        version INT NOT NULL,
        difficulty NUMERIC NOT NULL,
        cumulative_difficulty NUMERIC NOT NULL,
        value_out NUMERIC NOT NULL,
        transactions INT NOT NULL,
        transaction_fees NUMERIC NOT NULL
    );

    CREATE TABLE IF NOT EXISTS txs (
        txid VARCHAR(64) PRIMARY KEY,
        block_height BIGINT NOT NULL REFERENCES blocks(height),
        n INT NOT NULL,
        size BIGINT NOT NULL,
        version INT NOT NULL,
        locktime BIGINT NOT NULL,
        total_in NUMERIC NOT NULL,
        total_out NUMERIC NOT NULL,
        fee NUMERIC NOT NULL
    );

    CREATE TABLE IF NOT EXISTS txout (
        txid VARCHAR(64) NOT NULL REFERENCES txs(txid),
        n INT NOT NULL,
        value NUMERIC NOT NULL,
        scriptpubkey TEXT NOT NULL,
        address TEXT,
        linked_txid VARCHAR(64),
        spent BOOLEAN NOT NULL,
        PRIMARY KEY (txid, n)
    );

    CREATE TABLE IF NOT EXISTS txin (
        block_height BIGINT NOT NULL REFERENCES blocks(height),
        txid VARCHAR(64) NOT NULL REFERENCES txs(txid),
        n INT NOT NULL,
        scriptsig TEXT,
        sequence BIGINT NOT NULL,
        witness TEXT,
        coinbase BOOLEAN NOT NULL,
        spent BOOLEAN NOT NULL,
        prevout_hash VARCHAR(64) NOT NULL,
        prevout_n INT NOT NULL,
        PRIMARY KEY (block_height, txid, n)
    );

    CREATE INDEX IF NOT EXISTS txin_txid_idx ON txin (txid);
";

const BLOCK_COLUMNS: &str = "height, hash, prevhash, nexthash, merkleroot, time, bits, nonce, \
     size, version, difficulty, cumulative_difficulty, value_out, transactions, transaction_fees";

/// PostgreSQL-backed store over a bb8 connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| StoreError::Pool(format!("invalid database url: {}", e)))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .await?;

        Ok(Self { pool })
    }

    async fn conn(
        &self,
    ) -> Result<PooledConnection<'_, PostgresConnectionManager<NoTls>>, StoreError> {
        Ok(self.pool.get().await?)
    }

    pub async fn setup_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA).await?;
        info!("Database schema is in place");
        Ok(())
    }

    /// Check that every expected table exists. Unknown tables are only reported.
    pub async fn verify_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT table_name::TEXT FROM information_schema.tables WHERE table_schema = 'public'",
                &[],
            )
            .await?;
        let present = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;

        let (missing, extra) = compare_tables(&present);
        if !extra.is_empty() {
            warn!("Extra tables detected: {:?}", extra);
        }
        if !missing.is_empty() {
            return Err(StoreError::Schema { missing });
        }
        Ok(())
    }

    /// Operator reset: removes every indexed row along with the tables.
    pub async fn drop_all(&self) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.batch_execute(
            "
            DROP TABLE IF EXISTS txin;
            DROP TABLE IF EXISTS txout;
            DROP TABLE IF EXISTS txs;
            DROP TABLE IF EXISTS blocks;
            ",
        )
        .await?;
        warn!("Dropped all indexed tables");
        Ok(())
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for StoreError {
    fn from(err: bb8::RunError<tokio_postgres::Error>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

fn compare_tables(present: &[String]) -> (Vec<String>, Vec<String>) {
    let missing = EXPECTED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|p| p == *table))
        .map(|table| table.to_string())
        .collect();
    let extra = present
        .iter()
        .filter(|p| !EXPECTED_TABLES.contains(&p.as_str()))
        .cloned()
        .collect();
    (missing, extra)
}

fn classify(err: tokio_postgres::Error) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Conflict(err.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn block_from_row(row: &Row) -> Result<Block, StoreError> {
    Ok(Block {
        height: row.try_get::<_, i64>("height")? as u64,
        hash: row.try_get("hash")?,
        prev_hash: row.try_get("prevhash")?,
        next_hash: row.try_get("nexthash")?,
        merkle_root: row.try_get("merkleroot")?,
        time: row.try_get("time")?,
        bits: row.try_get("bits")?,
        nonce: row.try_get::<_, i64>("nonce")? as u64,
        size: row.try_get::<_, i64>("size")? as u64,
        version: row.try_get("version")?,
        difficulty: row.try_get("difficulty")?,
        cumulative_difficulty: row.try_get("cumulative_difficulty")?,
        value_out: row.try_get("value_out")?,
        transaction_count: row.try_get::<_, i32>("transactions")? as u32,
        total_fees: row.try_get("transaction_fees")?,
    })
}

async fn write_batch(
    tx: &tokio_postgres::Transaction<'_>,
    batch: &BlockBatch,
) -> Result<(), tokio_postgres::Error> {
    let block = &batch.block;
    tx.execute(
        "INSERT INTO blocks (height, hash, prevhash, nexthash, merkleroot, time, bits, nonce, \
         size, version, difficulty, cumulative_difficulty, value_out, transactions, transaction_fees) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        &[
            &(block.height as i64),
            &block.hash,
            &block.prev_hash,
            &block.next_hash,
            &block.merkle_root,
            &block.time,
            &block.bits,
            &(block.nonce as i64),
            &(block.size as i64),
            &block.version,
            &block.difficulty,
            &block.cumulative_difficulty,
            &block.value_out,
            &(block.transaction_count as i32),
            &block.total_fees,
        ],
    )
    .await?;

    if !batch.transactions.is_empty() {
        let sink = tx
            .copy_in(
                "COPY txs (txid, block_height, n, size, version, locktime, total_in, total_out, fee) \
                 FROM STDIN BINARY",
            )
            .await?;
        let mut writer = Box::pin(BinaryCopyInWriter::new(
            sink,
            &[
                Type::VARCHAR,
                Type::INT8,
                Type::INT4,
                Type::INT8,
                Type::INT4,
                Type::INT8,
                Type::NUMERIC,
                Type::NUMERIC,
                Type::NUMERIC,
            ],
        ));
        for t in &batch.transactions {
            let row: [&(dyn ToSql + Sync); 9] = [
                &t.txid,
                &(t.block_height as i64),
                &(t.n as i32),
                &(t.size as i64),
                &t.version,
                &(t.locktime as i64),
                &t.total_in,
                &t.total_out,
                &t.fee,
            ];
            writer.as_mut().write(&row).await?;
        }
        writer.as_mut().finish().await?;
    }

    if !batch.outputs.is_empty() {
        let sink = tx
            .copy_in(
                "COPY txout (txid, n, value, scriptpubkey, address, linked_txid, spent) \
                 FROM STDIN BINARY",
            )
            .await?;
        let mut writer = Box::pin(BinaryCopyInWriter::new(
            sink,
            &[
                Type::VARCHAR,
                Type::INT4,
                Type::NUMERIC,
                Type::TEXT,
                Type::TEXT,
                Type::VARCHAR,
                Type::BOOL,
            ],
        ));
        for o in &batch.outputs {
            let row: [&(dyn ToSql + Sync); 7] = [
                &o.txid,
                &(o.n as i32),
                &o.value,
                &o.script_pub_key,
                &o.address,
                &o.linked_txid,
                &o.spent,
            ];
            writer.as_mut().write(&row).await?;
        }
        writer.as_mut().finish().await?;
    }

    if !batch.inputs.is_empty() {
        let sink = tx
            .copy_in(
                "COPY txin (block_height, txid, n, scriptsig, sequence, witness, coinbase, spent, \
                 prevout_hash, prevout_n) FROM STDIN BINARY",
            )
            .await?;
        let mut writer = Box::pin(BinaryCopyInWriter::new(
            sink,
            &[
                Type::INT8,
                Type::VARCHAR,
                Type::INT4,
                Type::TEXT,
                Type::INT8,
                Type::TEXT,
                Type::BOOL,
                Type::BOOL,
                Type::VARCHAR,
                Type::INT4,
            ],
        ));
        for i in &batch.inputs {
            let row: [&(dyn ToSql + Sync); 10] = [
                &(i.block_height as i64),
                &i.txid,
                &(i.n as i32),
                &i.script_sig,
                &(i.sequence as i64),
                &i.witness,
                &i.coinbase,
                &i.spent,
                &i.prevout_hash,
                &(i.prevout_n as i32),
            ];
            writer.as_mut().write(&row).await?;
        }
        writer.as_mut().finish().await?;
    }

    for key in &batch.spent_inputs {
        let updated = tx
            .execute(
                "UPDATE txin SET spent = TRUE WHERE block_height = $1 AND txid = $2 AND n = $3",
                &[&(key.block_height as i64), &key.txid, &(key.n as i32)],
            )
            .await?;
        if updated == 0 {
            debug!("No stored input {}:{} to mark spent", key.txid, key.n);
        }
    }

    for spend in &batch.spent_outputs {
        let updated = tx
            .execute(
                "UPDATE txout SET spent = TRUE, linked_txid = $3 WHERE txid = $1 AND n = $2",
                &[&spend.key.txid, &(spend.key.n as i32), &spend.spent_by],
            )
            .await?;
        if updated == 0 {
            debug!(
                "No stored output {}:{} to mark spent",
                spend.key.txid, spend.key.n
            );
        }
    }

    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn highest_block(&self) -> Result<Option<Block>, StoreError> {
        let conn = self.conn().await?;
        let query = format!(
            "SELECT {} FROM blocks ORDER BY height DESC LIMIT 1",
            BLOCK_COLUMNS
        );
        let row = conn.query_opt(query.as_str(), &[]).await?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn block(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let conn = self.conn().await?;
        let query = format!("SELECT {} FROM blocks WHERE height = $1", BLOCK_COLUMNS);
        let row = conn.query_opt(query.as_str(), &[&(height as i64)]).await?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn set_next_hash(&self, height: u64, next_hash: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE blocks SET nexthash = $2 WHERE height = $1",
            &[&(height as i64), &next_hash],
        )
        .await?;
        Ok(())
    }

    async fn first_input_of(&self, txid: &str) -> Result<Option<InputKey>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT block_height, txid, n FROM txin WHERE txid = $1 \
                 ORDER BY block_height, n LIMIT 1",
                &[&txid],
            )
            .await?;

        row.map(|row| {
            Ok::<_, StoreError>(InputKey {
                block_height: row.try_get::<_, i64>("block_height")? as u64,
                txid: row.try_get("txid")?,
                n: row.try_get::<_, i32>("n")? as u32,
            })
        })
        .transpose()
    }

    async fn commit(&self, batch: BlockBatch) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        if let Err(err) = write_batch(&tx, &batch).await {
            tx.rollback().await?;
            return Err(classify(err));
        }

        tx.commit().await.map_err(classify)
    }
}
