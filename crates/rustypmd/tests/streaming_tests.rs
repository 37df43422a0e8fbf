//! Step-wise iteration over random-access and streaming backends.

use proptest::prelude::*;
use rustypmd::{
    Access, AnomalyKind, CloseStatus, Dataset, Error, MemoryBackend, MemoryStore, Series,
    SeriesIterator, SeriesOptions,
};
use rustypmd_io::Operation;

fn write_iterations(store: &MemoryStore, indices: &[u64]) {
    let mut series = Series::new(
        MemoryBackend::new(store.clone()),
        SeriesOptions::new(Access::Create),
    )
    .unwrap();
    for &index in indices {
        let rc = series
            .iteration_mut(index)
            .unwrap()
            .meshes_mut()
            .record_mut("rho")
            .unwrap()
            .scalar_mut()
            .unwrap();
        rc.reset_dataset(Dataset::of::<f64>(&[2])).unwrap();
        rc.store_chunk(&[index as f64, -(index as f64)], &[0], &[2])
            .unwrap();
    }
    series.close().unwrap();
}

fn read_only(backend: MemoryBackend) -> Series {
    Series::new(backend, SeriesOptions::new(Access::ReadOnly)).unwrap()
}

fn visit_all(series: &mut Series) -> Vec<u64> {
    let mut iterations = series.read_iterations();
    let mut seen = Vec::new();
    while let Some(iteration) = iterations.next() {
        seen.push(iteration.unwrap().index);
    }
    seen
}

// ---- Random access ----

#[test]
fn random_access_visits_in_ascending_order() {
    let store = MemoryStore::new();
    write_iterations(&store, &[5, 0, 2]);
    let mut series = read_only(MemoryBackend::new(store));

    let mut cursor = SeriesIterator::new(&mut series).unwrap();
    let mut seen = Vec::new();
    while cursor != SeriesIterator::end() {
        seen.push(cursor.index().unwrap());
        cursor.advance(&mut series).unwrap();
    }
    assert_eq!(seen, vec![0, 2, 5]);
    assert!(cursor.is_end());
    assert!(series.diagnostics().is_empty());
}

#[test]
fn iterations_are_parsed_lazily() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let mut series = read_only(MemoryBackend::new(store));
    assert_eq!(
        series.iteration(1).unwrap().close_status(),
        CloseStatus::ParseDeferred
    );

    let cursor = SeriesIterator::new(&mut series).unwrap();
    let iteration = cursor.get(&mut series).unwrap();
    assert_eq!(iteration.index, 0);
    assert!(iteration.meshes().contains("rho"));
    assert_eq!(
        series.iteration(1).unwrap().close_status(),
        CloseStatus::ParseDeferred
    );
}

#[test]
fn visited_iterations_are_closed() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let mut series = read_only(MemoryBackend::new(store));
    assert_eq!(visit_all(&mut series), vec![0, 1]);
    assert!(matches!(
        series.open_iteration(0),
        Err(Error::IterationClosed(0))
    ));
    assert!(series.iteration(1).unwrap().is_closed());
}

#[test]
fn cursor_checks_its_series() {
    let store = MemoryStore::new();
    write_iterations(&store, &[3]);
    let mut first = read_only(MemoryBackend::new(store.clone()));
    let mut second = read_only(MemoryBackend::new(store));

    let cursor = SeriesIterator::new(&mut first).unwrap();
    assert!(matches!(cursor.get(&mut second), Err(Error::ForeignSeries)));
    assert!(matches!(
        SeriesIterator::end().get(&mut first),
        Err(Error::EndIterator)
    ));
    assert!(matches!(
        SeriesIterator::default().advance(&mut first),
        Err(Error::EndIterator)
    ));
}

#[test]
fn empty_series_has_no_iterations() {
    let store = MemoryStore::new();
    write_iterations(&store, &[]);
    let mut series = read_only(MemoryBackend::new(store));
    let cursor = SeriesIterator::new(&mut series).unwrap();
    assert_eq!(cursor, SeriesIterator::end());
    assert!(visit_all(&mut series).is_empty());
}

#[test]
fn chunks_load_while_iterating() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1, 2]);
    let mut series = read_only(MemoryBackend::new(store));
    let mut iterations = series.read_iterations();
    let mut values = Vec::new();
    while let Some(iteration) = iterations.next() {
        let iteration = iteration.unwrap();
        let index = iteration.index;
        let chunk = iteration
            .meshes()
            .get("rho")
            .unwrap()
            .scalar()
            .unwrap()
            .load_chunk::<f64>(&[0], &[2])
            .unwrap();
        iterations.series().flush().unwrap();
        values.push((index, chunk.into_vec().unwrap()));
    }
    assert_eq!(
        values,
        vec![
            (0, vec![0.0, -0.0]),
            (1, vec![1.0, -1.0]),
            (2, vec![2.0, -2.0]),
        ]
    );
}

// ---- Streaming ----

#[test]
fn empty_step_ends_iteration_with_anomaly() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1, 2]);
    let backend = MemoryBackend::streaming_reader(store, vec![vec![0], vec![1, 2], vec![]]);
    let mut series = read_only(backend);

    assert_eq!(visit_all(&mut series), vec![0, 1, 2]);
    let anomalies = series.diagnostics();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind, AnomalyKind::EmptyStep);
    assert_eq!(anomalies[0].step, 3);

    // The reader stays at the end once the stream is over.
    assert!(visit_all(&mut series).is_empty());
    assert_eq!(series.diagnostics().len(), 1);
}

#[test]
fn exhausted_stream_ends_cleanly() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let backend = MemoryBackend::streaming_reader(store, vec![vec![0], vec![1]]);
    let mut series = read_only(backend);
    assert_eq!(visit_all(&mut series), vec![0, 1]);
    assert!(series.diagnostics().is_empty());
}

#[test]
fn readvertised_iterations_are_skipped() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let backend = MemoryBackend::streaming_reader(store, vec![vec![0], vec![0, 1], vec![1]]);
    let mut series = read_only(backend);
    assert_eq!(visit_all(&mut series), vec![0, 1]);
    assert!(series.diagnostics().is_empty());
}

#[test]
fn streaming_reader_sees_only_the_current_step() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let backend = MemoryBackend::streaming_reader(store, vec![vec![0], vec![1]]);
    let mut series = read_only(backend);

    let mut cursor = SeriesIterator::new(&mut series).unwrap();
    assert_eq!(cursor.pending().collect::<Vec<_>>(), vec![0]);
    assert_eq!(series.iteration_indices(), vec![0]);

    cursor.advance(&mut series).unwrap();
    assert_eq!(cursor.index(), Some(1));
    assert_eq!(series.iteration_indices(), vec![0, 1]);
}

#[test]
fn read_write_stream_ends_each_step_once() {
    let store = MemoryStore::new();
    write_iterations(&store, &[0, 1]);
    let backend = MemoryBackend::streaming_reader(store.clone(), vec![vec![0], vec![1]]);
    let mut series = Series::new(backend, SeriesOptions::new(Access::ReadWrite)).unwrap();
    store.clear_journal();

    assert_eq!(visit_all(&mut series), vec![0, 1]);
    // begin 0, end 0, begin 1, end 1, begin (over)
    assert_eq!(store.journal_of(Operation::Advance).len(), 5);
    assert!(series.diagnostics().is_empty());
}

#[test]
fn streaming_writer_output_replays_step_by_step() {
    let store = MemoryStore::new();
    {
        let mut series = Series::new(
            MemoryBackend::streaming_writer(store.clone()),
            SeriesOptions::new(Access::Create),
        )
        .unwrap();
        for index in 0..3u64 {
            let rc = series
                .iteration_mut(index)
                .unwrap()
                .meshes_mut()
                .record_mut("rho")
                .unwrap()
                .scalar_mut()
                .unwrap();
            rc.reset_dataset(Dataset::of::<i32>(&[1])).unwrap();
            rc.store_chunk(&[index as i32 * 7], &[0], &[1]).unwrap();
            series.close_iteration(index).unwrap();
        }
        series.close().unwrap();
    }
    assert_eq!(store.steps(), vec![vec![0], vec![1], vec![2]]);

    let mut series = read_only(MemoryBackend::replay(store));
    let mut iterations = series.read_iterations();
    let mut values = Vec::new();
    while let Some(iteration) = iterations.next() {
        let iteration = iteration.unwrap();
        let chunk = iteration
            .meshes()
            .get("rho")
            .unwrap()
            .scalar()
            .unwrap()
            .load_chunk::<i32>(&[0], &[1])
            .unwrap();
        iterations.series().flush().unwrap();
        values.extend(chunk.into_vec().unwrap());
    }
    assert_eq!(values, vec![0, 7, 14]);
}

#[test]
fn streaming_writer_closes_open_iterations_on_close() {
    let store = MemoryStore::new();
    let mut series = Series::new(
        MemoryBackend::streaming_writer(store.clone()),
        SeriesOptions::new(Access::Create),
    )
    .unwrap();
    series.iteration_mut(4).unwrap().set_time(1.0);
    series.iteration_mut(9).unwrap().set_time(2.0);
    series.close().unwrap();
    assert_eq!(store.steps(), vec![vec![4], vec![9]]);
}

// ---- Properties ----

proptest! {
    #[test]
    fn random_access_order_is_sorted(indices in prop::collection::btree_set(0u64..500, 0..12)) {
        let indices: Vec<u64> = indices.into_iter().collect();
        let store = MemoryStore::new();
        let mut shuffled = indices.clone();
        shuffled.reverse();
        write_iterations(&store, &shuffled);
        let mut series = read_only(MemoryBackend::new(store));
        prop_assert_eq!(visit_all(&mut series), indices);
    }

    #[test]
    fn streamed_steps_are_visited_in_order(steps in prop::collection::vec(1usize..4, 1..5)) {
        let mut schedule = Vec::new();
        let mut next = 0u64;
        for width in steps {
            schedule.push((next..next + width as u64).collect::<Vec<_>>());
            next += width as u64;
        }
        let all: Vec<u64> = (0..next).collect();
        let store = MemoryStore::new();
        write_iterations(&store, &all);
        let mut series = read_only(MemoryBackend::streaming_reader(store, schedule));
        prop_assert_eq!(visit_all(&mut series), all);
        prop_assert!(series.diagnostics().is_empty());
    }
}
