use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::models::{HistoryTurn, SessionId};

/// One answered question. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, topic: Option<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            topic,
            timestamp: Utc::now(),
        }
    }
}

impl From<&Exchange> for HistoryTurn {
    fn from(exchange: &Exchange) -> Self {
        HistoryTurn {
            question: exchange.question.clone(),
            answer: exchange.answer.clone(),
        }
    }
}

/// Short-term memory of one session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,

    /// Session creation time
    pub created_at: Instant,

    /// Last read or write; TTL is measured from here
    pub last_activity: Instant,

    /// Oldest first, bounded by `max_history`
    pub history: VecDeque<Exchange>,

    pub current_topic: Option<String>,

    /// Consecutive follow-up questions on the current topic
    pub follow_up_count: u32,

    /// Monotonic LRU stamp
    pub(crate) touch_seq: u64,
}

impl Session {
    pub fn new(session_id: SessionId, touch_seq: u64) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            created_at: now,
            last_activity: now,
            history: VecDeque::new(),
            current_topic: None,
            follow_up_count: 0,
            touch_seq,
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    pub fn touch(&mut self, touch_seq: u64) {
        self.last_activity = Instant::now();
        self.touch_seq = touch_seq;
    }

    /// Append, dropping the oldest entries beyond `max_history`
    pub fn push_exchange(&mut self, exchange: Exchange, max_history: usize) {
        if let Some(topic) = &exchange.topic {
            self.current_topic = Some(topic.clone());
        }
        self.history.push_back(exchange);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }

    pub fn last_exchange(&self) -> Option<&Exchange> {
        self.history.back()
    }

    /// Most recent `n` turns, oldest first
    pub fn recent_turns(&self, n: usize) -> Vec<HistoryTurn> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).map(HistoryTurn::from).collect()
    }
}

/// Context store statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub evictions_total: u64,
    pub expirations_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_exchange_trims_oldest() {
        let mut s = Session::new("s".into(), 0);
        for i in 0..5 {
            s.push_exchange(Exchange::new(format!("q{}", i), format!("a{}", i), None), 3);
        }
        let questions: Vec<_> = s.history.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
        assert_eq!(s.last_exchange().unwrap().answer, "a4");
    }

    #[test]
    fn test_topic_only_updated_when_present() {
        let mut s = Session::new("s".into(), 0);
        s.push_exchange(Exchange::new("q", "a", Some("penalties".into())), 10);
        s.push_exchange(Exchange::new("q", "a", None), 10);
        assert_eq!(s.current_topic.as_deref(), Some("penalties"));
    }

    #[test]
    fn test_recent_turns() {
        let mut s = Session::new("s".into(), 0);
        for i in 0..4 {
            s.push_exchange(Exchange::new(format!("q{}", i), "a", None), 10);
        }
        let turns = s.recent_turns(2);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question, "q2");
        assert_eq!(turns[1].question, "q3");
    }
}
