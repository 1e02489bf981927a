//! Storage health check

use anyhow::Result;
use opendal::Operator;

/// Verify the storage endpoint is reachable by listing the root
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_is_healthy() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        assert!(tokio_test::block_on(check_health(&op)).is_ok());
    }
}
