//! Priority queue and dispatcher benchmarks.
//!
//! - **submit_pop**: fill every bucket, then drain in priority order
//! - **resort**: move queued chunks between buckets as levels change
//! - **dispatcher**: end-to-end submit through an inline mailbox

use std::sync::Arc;

use chunk_pipeline::{
	dispatch::ChunkTaskPriorityQueue, ChunkPos, ChunkTaskDispatcher, InlineExecutor, MAX_LEVEL,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn positions(count: i32) -> Vec<(ChunkPos, u8)> {
	(0..count)
		.map(|i| {
			let pos = ChunkPos::new(i % 64, i / 64);
			let level = (i as u32 * 7 % (MAX_LEVEL as u32 + 1)) as u8;
			(pos, level)
		})
		.collect()
}

fn bench_submit_pop(c: &mut Criterion) {
	let mut group = c.benchmark_group("dispatch/submit_pop");

	for count in [256, 4096] {
		let input = positions(count);
		group.throughput(Throughput::Elements(count as u64));
		group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
			b.iter(|| {
				let mut queue = ChunkTaskPriorityQueue::new("bench");
				for (i, (pos, level)) in input.iter().enumerate() {
					queue.submit(i, *pos, *level);
				}
				let mut popped = 0;
				while let Some(entry) = queue.pop() {
					popped += entry.tasks.len();
				}
				black_box(popped)
			});
		});
	}

	group.finish();
}

fn bench_resort(c: &mut Criterion) {
	let mut group = c.benchmark_group("dispatch/resort");

	let input = positions(4096);
	group.throughput(Throughput::Elements(input.len() as u64));
	group.bench_function("4096", |b| {
		let mut queue = ChunkTaskPriorityQueue::new("bench");
		for (i, (pos, level)) in input.iter().enumerate() {
			queue.submit(i, *pos, *level);
		}
		let mut levels: Vec<u8> = input.iter().map(|(_, level)| *level).collect();
		b.iter(|| {
			for ((pos, _), level) in input.iter().zip(levels.iter_mut()) {
				let next = (*level + 1) % (MAX_LEVEL + 1);
				queue.resort(*level, *pos, next);
				*level = next;
			}
			black_box(queue.top_index())
		});
	});

	group.finish();
}

fn bench_dispatcher(c: &mut Criterion) {
	let mut group = c.benchmark_group("dispatch/dispatcher");

	let input = positions(1024);
	group.throughput(Throughput::Elements(input.len() as u64));
	group.bench_function("inline_1024", |b| {
		let dispatcher = ChunkTaskDispatcher::new("bench", Arc::new(InlineExecutor), Arc::new(InlineExecutor));
		b.iter(|| {
			for (pos, level) in &input {
				let level = *level;
				dispatcher.submit(|| {}, *pos, move || level);
			}
			black_box(dispatcher.queued_task_count())
		});
	});

	group.finish();
}

criterion_group!(benches, bench_submit_pop, bench_resort, bench_dispatcher);
criterion_main!(benches);
