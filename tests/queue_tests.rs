use abr_cast::queue::{QueueError, TaskQueue};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio_test::{assert_ok, assert_pending, assert_ready_eq, task};

#[tokio::test]
async fn test_bounded_queue_basic() {
    let queue = TaskQueue::bounded(2);

    assert_ok!(queue.try_enqueue(1));
    assert_ok!(queue.try_enqueue(2));

    // Full queues fail fast instead of waiting
    assert!(matches!(queue.try_enqueue(3), Err(QueueError::QueueFull)));

    let mut stream = queue.dequeue();
    assert_eq!(stream.next().await, Some(1));
    assert_eq!(stream.next().await, Some(2));

    assert!(queue.try_enqueue(3).is_ok());
    assert_eq!(stream.next().await, Some(3));
}

#[tokio::test]
async fn test_idle_consumer_is_woken_by_enqueue() {
    let queue = TaskQueue::bounded(4);
    let mut stream = queue.dequeue();
    let mut next = task::spawn(stream.next());

    assert_pending!(next.poll());
    assert_ok!(queue.try_enqueue(7));
    assert!(next.is_woken());
    assert_ready_eq!(next.poll(), Some(7));
}

#[tokio::test]
async fn test_queue_close_drains_then_ends() {
    let queue = TaskQueue::bounded(5);
    queue.try_enqueue(1).unwrap();
    queue.try_enqueue(2).unwrap();

    queue.close();
    assert!(queue.is_closed());
    assert!(matches!(queue.try_enqueue(3), Err(QueueError::QueueClosed)));

    let mut stream = queue.dequeue();
    assert_eq!(stream.next().await, Some(1));
    assert_eq!(stream.next().await, Some(2));
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn test_close_wakes_idle_consumer() {
    let queue: TaskQueue<u32> = TaskQueue::bounded(4);
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().collect::<Vec<_>>().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let drained = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer should finish after close")
        .unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn test_queue_stats() {
    let queue = TaskQueue::bounded(10);
    for i in 0..4 {
        queue.try_enqueue(i).unwrap();
    }

    let stats = queue.stats();
    assert_eq!(stats.length, 4);
    assert_eq!(stats.capacity, 10);
    assert!((stats.utilization - 0.4).abs() < f64::EPSILON);
    assert!(!stats.is_closed);
    assert_eq!(stats.to_string(), "Queue(4/10, 40.0%)");

    queue.close();
    assert!(queue.stats().to_string().ends_with(", closed)"));
}

#[tokio::test]
async fn test_items_go_to_exactly_one_consumer() {
    let queue = TaskQueue::bounded(100);
    for i in 0..100u32 {
        queue.try_enqueue(i).unwrap();
    }
    queue.close();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().collect::<Vec<u32>>().await })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for consumer in consumers {
        for item in consumer.await.unwrap() {
            seen.insert(item);
            total += 1;
        }
    }
    assert_eq!(total, 100);
    assert_eq!(seen.len(), 100);
    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_accepted_item_is_drained_across_close() {
    let queue: TaskQueue<u64> = TaskQueue::bounded(64);
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().collect::<Vec<u64>>().await })
    };

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut accepted = 0usize;
                for i in 0.. {
                    match queue.try_enqueue(p * 1_000_000 + i) {
                        Ok(()) => accepted += 1,
                        Err(QueueError::QueueFull) => tokio::task::yield_now().await,
                        Err(QueueError::QueueClosed) => break,
                        Err(e) => panic!("unexpected queue error: {}", e),
                    }
                }
                accepted
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let mut accepted = 0;
    for producer in producers {
        accepted += producer.await.unwrap();
    }
    let drained = consumer.await.unwrap();
    assert!(accepted > 0);
    assert_eq!(drained.len(), accepted);
    assert!(queue.is_empty());
}
