use std::time::Duration;

use fc_command::Command;
use fc_store::{Aggregate, ScoreBound};

/// Commands queued for one atomic commit. Replies come back in push order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Queue a command and return the index its reply will occupy.
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    pub fn get(&mut self, key: &str) -> &mut Self {
        self.push(Command::Get { key: key.to_owned() });
        self
    }

    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> &mut Self {
        self.push(Command::Set {
            key: key.to_owned(),
            value: value.to_owned(),
            ttl,
        });
        self
    }

    pub fn del(&mut self, keys: &[&str]) -> &mut Self {
        self.push(Command::Del {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
        });
        self
    }

    pub fn incr_by(&mut self, key: &str, delta: i64) -> &mut Self {
        self.push(Command::IncrBy {
            key: key.to_owned(),
            delta,
        });
        self
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.to_owned(),
            ttl,
        });
        self
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(Command::RPush {
            key: key.to_owned(),
            values: vec![value.to_owned()],
        });
        self
    }

    pub fn lpush(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(Command::LPush {
            key: key.to_owned(),
            values: vec![value.to_owned()],
        });
        self
    }

    pub fn lrem(&mut self, key: &str, count: i64, value: &str) -> &mut Self {
        self.push(Command::LRem {
            key: key.to_owned(),
            count,
            value: value.to_owned(),
        });
        self
    }

    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> &mut Self {
        self.push(Command::LTrim {
            key: key.to_owned(),
            start,
            stop,
        });
        self
    }

    pub fn zadd(&mut self, key: &str, member: &str, score: f64) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.to_owned(),
            members: vec![(score, member.to_owned())],
        });
        self
    }

    pub fn zincrby(&mut self, key: &str, member: &str, delta: f64) -> &mut Self {
        self.push(Command::ZIncrBy {
            key: key.to_owned(),
            member: member.to_owned(),
            delta,
        });
        self
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> &mut Self {
        self.push(Command::ZRem {
            key: key.to_owned(),
            members: vec![member.to_owned()],
        });
        self
    }

    pub fn zrank(&mut self, key: &str, member: &str) -> &mut Self {
        self.push(Command::ZRank {
            key: key.to_owned(),
            member: member.to_owned(),
        });
        self
    }

    pub fn zrange_by_rank(&mut self, key: &str, start: i64, stop: i64) -> &mut Self {
        self.push(Command::ZRangeByRank {
            key: key.to_owned(),
            start,
            stop,
        });
        self
    }

    pub fn zrange_by_score(&mut self, key: &str, min: ScoreBound, max: ScoreBound) -> &mut Self {
        self.push(Command::ZRangeByScore {
            key: key.to_owned(),
            min,
            max,
        });
        self
    }

    pub fn zremrangebyscore(&mut self, key: &str, min: ScoreBound, max: ScoreBound) -> &mut Self {
        self.push(Command::ZRemRangeByScore {
            key: key.to_owned(),
            min,
            max,
        });
        self
    }

    pub fn zremrangebyrank(&mut self, key: &str, start: i64, stop: i64) -> &mut Self {
        self.push(Command::ZRemRangeByRank {
            key: key.to_owned(),
            start,
            stop,
        });
        self
    }

    pub fn zinterstore(
        &mut self,
        dest: &str,
        sources: &[&str],
        weights: &[f64],
        aggregate: Aggregate,
    ) -> &mut Self {
        self.push(Command::ZInterStore {
            dest: dest.to_owned(),
            sources: sources.iter().map(|k| (*k).to_owned()).collect(),
            weights: weights.to_vec(),
            aggregate,
        });
        self
    }
}
