use std::time::{Duration, Instant};
use winit::window::Window;

const SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// Frame cadence tracking; refreshes the window title with the frame rate and
/// model count twice a second.
pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_sample_time: Instant,
    frame_count: u32,
    pub frame_dt: f32,
    render_ms: f32,
    base_title: String,
}

impl FrameTiming {
    pub fn new(base_title: impl Into<String>, now: Instant) -> Self {
        Self {
            last_frame_time: None,
            last_sample_time: now,
            frame_count: 0,
            frame_dt: 1.0 / 60.0,
            render_ms: 0.0,
            base_title: base_title.into(),
        }
    }

    pub fn set_render_ms(&mut self, render_ms: f32) {
        self.render_ms = render_ms;
    }

    /// Records a frame at `now`. Returns the frame rate when a sample period
    /// has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        let dt = match self.last_frame_time {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::from_millis(16),
        };
        self.last_frame_time = Some(now);
        self.frame_dt = dt.as_secs_f32();

        self.frame_count = self.frame_count.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed < SAMPLE_PERIOD {
            return None;
        }
        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_count = 0;
        self.last_sample_time = now;
        Some(fps)
    }

    pub fn title(&self, fps: f32, model_count: usize) -> String {
        format!(
            "{} - {} model(s) - {:.1} fps (render {:.2} ms)",
            self.base_title, model_count, fps, self.render_ms
        )
    }

    pub fn update(&mut self, window: Option<&Window>, now: Instant, model_count: usize) {
        if let Some(fps) = self.tick(now) {
            if let Some(window) = window {
                window.set_title(&self.title(fps, model_count));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_fps_once_per_sample_period() {
        let start = Instant::now();
        let mut timing = FrameTiming::new("stageview", start);
        for frame in 1..10 {
            assert_eq!(timing.tick(start + Duration::from_millis(frame * 50)), None);
        }
        let fps = timing.tick(start + Duration::from_millis(500)).unwrap();
        assert!((fps - 20.0).abs() < 1e-3);
        assert!((timing.frame_dt - 0.05).abs() < 1e-6);
        assert_eq!(timing.tick(start + Duration::from_millis(550)), None);
    }

    #[test]
    fn title_mentions_models_and_rate() {
        let mut timing = FrameTiming::new("stageview", Instant::now());
        timing.set_render_ms(1.5);
        assert_eq!(
            timing.title(59.94, 2),
            "stageview - 2 model(s) - 59.9 fps (render 1.50 ms)"
        );
    }
}
