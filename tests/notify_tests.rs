//! Concurrency behavior of the shared notification collector.

use std::sync::Arc;
use std::thread;

use lograke::NotificationCollector;

#[test]
fn test_concurrent_reports_keep_exact_totals() {
    let collector = Arc::new(NotificationCollector::new(50));
    let threads = 8;
    let reports_per_thread = 100;

    thread::scope(|scope| {
        for t in 0..threads {
            let collector = Arc::clone(&collector);
            scope.spawn(move || {
                let reporter = format!("worker-{}", t);
                for i in 0..reports_per_thread {
                    collector.report_error(
                        format!("failure {}", i),
                        Some("node1/server.log"),
                        Some(i as u64),
                        &reporter,
                    );
                    collector.report_warning(format!("oddity {}", i), None, None, &reporter);
                }
            });
        }
    });

    let errors = collector.errors();
    assert_eq!(errors.total, (threads * reports_per_thread) as u64);
    assert_eq!(errors.details.len(), 50);
    for t in 0..threads {
        assert_eq!(
            errors.per_reporter.get(&format!("worker-{}", t)),
            Some(&(reports_per_thread as u64))
        );
    }
    assert_eq!(
        collector.warning_total(),
        (threads * reports_per_thread) as u64
    );
}
