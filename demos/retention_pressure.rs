use dashy::prelude::*;
use log::info;
use std::sync::Arc;

const MB: u64 = 1_000_000;
const TOTAL: u64 = 4_000 * MB;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = DashcamConfig::default();
    let clock = ManualClock::new(1_700_000_000_000);
    let store = Arc::new(MemoryStore::new(TOTAL));
    let buffer = BufferManager::new(store.clone(), Arc::new(clock.clone()), config.retention);
    let signals = buffer.subscribe();

    // free space shrinks while driving, one 30s segment per step
    let mut used = 1_000 * MB;
    for step in 0..360 {
        clock.advance(30_000);
        used += 8 * MB;
        store.set_estimate(StorageEstimate::new(used, TOTAL));

        match buffer.add_segment(vec![0; 1_024]) {
            Ok(_) => (),
            Err(e) => {
                info!("Segment rejected: {}", e);
                buffer.force_cleanup(10)?;
                used -= 80 * MB;
            }
        }

        if step % 60 == 59 {
            let window = buffer.adapt_retention_window()?;
            info!("Retention window is now {} min", window / 60_000);
        }
        for signal in signals.try_iter() {
            info!("Storage {:?} at {:.1}%", signal.level, signal.percent);
        }
    }

    let clip = buffer.save_clip(5 * 60_000, ClipTrigger::Accelerometer)?;
    eprintln!("Saved clip {} covering {}s", clip.id, clip.duration_ms / 1_000);
    eprintln!("Storage: {:#?}", buffer.stats()?);
    Ok(())
}
