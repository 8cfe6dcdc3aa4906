#![feature(test)]

extern crate test;

use dashy::config::TrackerConfig;
use dashy::detection::Detection;
use dashy::test_stuff::BoxGen;
use dashy::trackers::vehicle::VehicleTracker;
use test::Bencher;

#[bench]
fn bench_vehicle_tracker_00005(b: &mut Bencher) {
    bench_tracker(5, b);
}

#[bench]
fn bench_vehicle_tracker_00020(b: &mut Bencher) {
    bench_tracker(20, b);
}

#[bench]
fn bench_vehicle_tracker_00100(b: &mut Bencher) {
    bench_tracker(100, b);
}

fn bench_tracker(objects: usize, b: &mut Bencher) {
    let pos_drift = 1.0;
    let box_drift = 0.1;
    let mut iterators = (0..objects)
        .map(|i| BoxGen::new(100.0 * i as f32, 50.0, 80.0, 60.0, pos_drift, box_drift))
        .collect::<Vec<_>>();

    let config = TrackerConfig::default();
    let mut tracker = VehicleTracker::new();
    let mut now = 0;

    b.iter(|| {
        now += 100;
        let detections = iterators
            .iter_mut()
            .map(|i| Detection::new("car", 0.9, i.next().unwrap()))
            .collect::<Vec<_>>();
        let eligible = tracker.update(&detections, 20_000, 1_080, now, &config);
        assert!(eligible.len() <= objects);
    });
}
