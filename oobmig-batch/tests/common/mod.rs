use async_trait::async_trait;
use oobmig_batch::{BatchError, Execute, Row, Statement, Value};
use std::collections::VecDeque;

/// Records statements instead of running them.
#[derive(Default)]
pub struct Recorder {
    pub statements: Vec<Statement>,
    pub returned: VecDeque<Vec<Row>>,
    pub fail_next: bool,
}

impl Recorder {
    pub fn rows_per_statement(&self, columns: usize) -> Vec<usize> {
        self.statements
            .iter()
            .map(|s| s.params.len() / columns)
            .collect()
    }
}

#[async_trait]
impl Execute for Recorder {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Row>, BatchError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(BatchError::Callback(anyhow::anyhow!("connection reset")));
        }

        self.statements.push(statement);

        Ok(self.returned.pop_front().unwrap_or_default())
    }
}

pub fn row(i: i64) -> Row {
    vec![Value::Int(i), Value::Text(format!("name-{i}"))]
}
