use crate::config::{ReadAffinity, RedisConfig};
use crate::error::{Result, StorageError};
use crate::keys::KeySchema;
use ::redis::aio::{ConnectionLike, MultiplexedConnection};
use ::redis::cluster::ClusterClient;
use ::redis::cluster_async::ClusterConnection;
use ::redis::{AsyncCommands, Client, Cmd, Pipeline, RedisFuture, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

/// Members per SADD/SREM command when writing large sets.
const WRITE_BATCH: usize = 1000;
/// Batched commands per pipeline flush.
const BATCHES_PER_FLUSH: usize = 10;
/// COUNT hint for cursor-based scans.
const SCAN_COUNT: usize = 1000;

/// A single-node or cluster connection behind one interface.
#[derive(Clone)]
pub(crate) enum Connection {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

impl ConnectionLike for Connection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Connection::Standalone(conn) => conn.req_packed_command(cmd),
            Connection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Connection::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            Connection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Connection::Standalone(conn) => conn.get_db(),
            Connection::Cluster(conn) => conn.get_db(),
        }
    }
}

/// Key-value, set and hash operations over Redis, with a read/write
/// connection split. Every operation is bounded by the configured
/// operation timeout.
#[derive(Clone)]
pub struct RedisStore {
    write: Connection,
    read: Connection,
    keys: KeySchema,
    op_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let keys = KeySchema::new(&config.prefix);
        let op_timeout = config.operation_timeout();
        let connect_timeout = config.connect_timeout();

        if config.cluster {
            let mut builder = ClusterClient::builder(vec![config.uri.clone()]);
            if config.read_affinity == ReadAffinity::Replica {
                builder = builder.read_from_replicas();
            }
            let client = builder.build()?;
            let conn = connect_bounded(connect_timeout, client.get_async_connection()).await?;
            let conn = Connection::Cluster(conn);
            return Ok(RedisStore {
                write: conn.clone(),
                read: conn,
                keys,
                op_timeout,
            });
        }

        let client = Client::open(config.uri.as_str())?;
        let write = Connection::Standalone(
            connect_bounded(connect_timeout, client.get_multiplexed_async_connection()).await?,
        );
        let read = match (&config.read_uri, config.read_affinity) {
            (Some(read_uri), ReadAffinity::Replica) => {
                let read_client = Client::open(read_uri.as_str())?;
                Connection::Standalone(
                    connect_bounded(
                        connect_timeout,
                        read_client.get_multiplexed_async_connection(),
                    )
                    .await?,
                )
            }
            _ => write.clone(),
        };

        Ok(RedisStore {
            write,
            read,
            keys,
            op_timeout,
        })
    }

    pub fn keys(&self) -> &KeySchema {
        &self.keys
    }

    pub(crate) fn write_conn(&self) -> Connection {
        self.write.clone()
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = ::redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StorageError::Timeout(self.op_timeout)),
        }
    }

    // Scalars

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.read.clone();
        let value: Option<String> = self.bounded(conn.get(key)).await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.set(key, value)).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.del(key)).await?;
        Ok(())
    }

    /// SET key value NX PX ttl. Returns whether the key was set.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.write.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64);
        let reply: Option<String> = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.expire(key, ttl.as_secs() as i64)).await?;
        Ok(())
    }

    // Sets

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.sadd(key, member)).await?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.srem(key, member)).await?;
        Ok(())
    }

    /// Add a large member set in pipelined batches instead of one round
    /// trip per member.
    pub async fn sadd_batched(&self, key: &str, members: &HashSet<String>) -> Result<()> {
        self.batched_set_op("SADD", key, members).await
    }

    /// Remove a large member set in pipelined batches.
    pub async fn srem_batched(&self, key: &str, members: &HashSet<String>) -> Result<()> {
        self.batched_set_op("SREM", key, members).await
    }

    async fn batched_set_op(
        &self,
        op: &str,
        key: &str,
        members: &HashSet<String>,
    ) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.write.clone();
        let members: Vec<&String> = members.iter().collect();
        let mut pipe = ::redis::pipe();
        let mut pending = 0;
        for chunk in members.chunks(WRITE_BATCH) {
            pipe.cmd(op).arg(key).arg(chunk).ignore();
            pending += 1;
            if pending == BATCHES_PER_FLUSH {
                let _: () = self.bounded(pipe.query_async(&mut conn)).await?;
                pipe = ::redis::pipe();
                pending = 0;
            }
        }
        if pending > 0 {
            let _: () = self.bounded(pipe.query_async(&mut conn)).await?;
        }
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.read.clone();
        let members: HashSet<String> = self.bounded(conn.smembers(key)).await?;
        Ok(members)
    }

    /// Cursor-based SSCAN over a set, for sets too large for one SMEMBERS
    /// reply.
    pub async fn sscan(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.read.clone();
        let mut members = HashSet::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = ::redis::cmd("SSCAN");
            cmd.arg(key).arg(cursor).arg("COUNT").arg(SCAN_COUNT);
            let (next, chunk): (u64, Vec<String>) =
                self.bounded(cmd.query_async(&mut conn)).await?;
            members.extend(chunk);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(members)
    }

    pub async fn scard(&self, key: &str) -> Result<u64> {
        let mut conn = self.read.clone();
        let count: u64 = self.bounded(conn.scard(key)).await?;
        Ok(count)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.read.clone();
        let found: bool = self.bounded(conn.sismember(key, member)).await?;
        Ok(found)
    }

    /// Membership of one value across many sets, pipelined into a single
    /// round trip. Results align with `keys`.
    pub async fn sismember_many(&self, keys: &[String], member: &str) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.read.clone();
        let mut pipe = ::redis::pipe();
        for key in keys {
            pipe.cmd("SISMEMBER").arg(key).arg(member);
        }
        let found: Vec<bool> = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(found)
    }

    /// Members of `first` not present in `second`. Both keys must share a
    /// hash tag in cluster mode.
    pub async fn sdiff(&self, first: &str, second: &str) -> Result<HashSet<String>> {
        let mut conn = self.read.clone();
        let members: HashSet<String> = self.bounded(conn.sdiff(&[first, second][..])).await?;
        Ok(members)
    }

    /// SDIFFSTORE into `dest`, returning the stored cardinality. All three
    /// keys must share a hash tag in cluster mode.
    pub async fn sdiffstore(&self, dest: &str, first: &str, second: &str) -> Result<u64> {
        let mut conn = self.write.clone();
        let count: u64 = self
            .bounded(conn.sdiffstore(dest, &[first, second][..]))
            .await?;
        Ok(count)
    }

    // Hashes

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.read.clone();
        let value: Option<String> = self.bounded(conn.hget(key, field)).await?;
        Ok(value)
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.hset(key, field, value)).await?;
        Ok(())
    }

    pub async fn hset_multiple(&self, key: &str, items: &[(String, String)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.hset_multiple(key, items)).await?;
        Ok(())
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.write.clone();
        let _: () = self.bounded(conn.hdel(key, field)).await?;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.read.clone();
        let entries: HashMap<String, String> = self.bounded(conn.hgetall(key)).await?;
        Ok(entries)
    }

    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.read.clone();
        let fields: Vec<String> = self.bounded(conn.hkeys(key)).await?;
        Ok(fields)
    }
}

async fn connect_bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = ::redis::RedisResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StorageError::Timeout(timeout)),
    }
}
