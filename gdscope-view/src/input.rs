//!
//! # Input Controller
//!
//! Multiplexes mouse, keyboard, and touch events into the small command
//! set the engine executes. The controller is a pure state machine over
//! button/touch state; commands execute synchronously on the caller's
//! thread and never re-enter the renderer.
//!

/// Zoom step per wheel notch or Enter press
const ZOOM_STEP_IN: f64 = 1.1;
const ZOOM_STEP_OUT: f64 = 0.9;
/// Arrow keys pan by this fraction of the viewport
const ARROW_PAN_FRACTION: f64 = 0.1;

/// Commands the engine executes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Pan { dx: f64, dy: f64 },
    ZoomAt { x: f64, y: f64, factor: f64 },
    Fit,
    ToggleGrid,
    ToggleMetrics,
    ToggleLayerPanel,
    CenterOn { x: f64, y: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Enter,
    Space,
    F,
    G,
    P,
    L,
}

/// Raw events as delivered by the host shell
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Wheel { x: f64, y: f64, delta: f64 },
    MouseDown { x: f64, y: f64, button: MouseButton },
    MouseUp { x: f64, y: f64, button: MouseButton },
    MouseMove { x: f64, y: f64 },
    KeyDown { key: Key, shift: bool },
    KeyUp { key: Key },
    TouchStart { touches: Vec<(f64, f64)> },
    TouchMove { touches: Vec<(f64, f64)> },
    TouchEnd,
}

///
/// # Input Controller
///
#[derive(Debug, Default)]
pub struct InputController {
    /// Screen size, for arrow-key pan and Enter zoom-about-center
    width: f64,
    height: f64,
    /// Last pointer position while dragging
    drag_from: Option<(f64, f64)>,
    space_down: bool,
    left_down: bool,
    middle_down: bool,
    /// Last pointer position, for the coordinate readout
    pub pointer: Option<(f64, f64)>,
    /// Active touch points
    touches: Vec<(f64, f64)>,
}
impl InputController {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }
    /// Whether a pan drag is active (middle button, or space+left)
    fn panning(&self) -> bool {
        self.middle_down || (self.space_down && self.left_down)
    }

    /// Translate one event into zero or more commands
    pub fn handle(&mut self, event: InputEvent) -> Vec<Command> {
        match event {
            InputEvent::Wheel { x, y, delta } => {
                let factor = if delta > 0.0 { ZOOM_STEP_IN } else { ZOOM_STEP_OUT };
                vec![Command::ZoomAt { x, y, factor }]
            }
            InputEvent::MouseDown { x, y, button } => {
                match button {
                    MouseButton::Left => self.left_down = true,
                    MouseButton::Middle => self.middle_down = true,
                    MouseButton::Right => (),
                }
                if self.panning() {
                    self.drag_from = Some((x, y));
                }
                Vec::new()
            }
            InputEvent::MouseUp { button, .. } => {
                match button {
                    MouseButton::Left => self.left_down = false,
                    MouseButton::Middle => self.middle_down = false,
                    MouseButton::Right => (),
                }
                if !self.panning() {
                    self.drag_from = None;
                }
                Vec::new()
            }
            InputEvent::MouseMove { x, y } => {
                self.pointer = Some((x, y));
                if let Some((fx, fy)) = self.drag_from {
                    if self.panning() {
                        self.drag_from = Some((x, y));
                        return vec![Command::Pan {
                            dx: x - fx,
                            dy: y - fy,
                        }];
                    }
                }
                Vec::new()
            }
            InputEvent::KeyDown { key, shift } => self.key_down(key, shift),
            InputEvent::KeyUp { key } => {
                if key == Key::Space {
                    self.space_down = false;
                    if !self.panning() {
                        self.drag_from = None;
                    }
                }
                Vec::new()
            }
            InputEvent::TouchStart { touches } => {
                self.touches = touches;
                Vec::new()
            }
            InputEvent::TouchMove { touches } => self.touch_move(touches),
            InputEvent::TouchEnd => {
                self.touches.clear();
                Vec::new()
            }
        }
    }

    fn key_down(&mut self, key: Key, shift: bool) -> Vec<Command> {
        let pan_x = self.width * ARROW_PAN_FRACTION;
        let pan_y = self.height * ARROW_PAN_FRACTION;
        match key {
            Key::ArrowLeft => vec![Command::Pan { dx: pan_x, dy: 0.0 }],
            Key::ArrowRight => vec![Command::Pan { dx: -pan_x, dy: 0.0 }],
            Key::ArrowUp => vec![Command::Pan { dx: 0.0, dy: pan_y }],
            Key::ArrowDown => vec![Command::Pan { dx: 0.0, dy: -pan_y }],
            Key::Enter => {
                let factor = if shift { ZOOM_STEP_OUT } else { ZOOM_STEP_IN };
                vec![Command::ZoomAt {
                    x: self.width / 2.0,
                    y: self.height / 2.0,
                    factor,
                }]
            }
            Key::F => vec![Command::Fit],
            Key::G => vec![Command::ToggleGrid],
            Key::P => vec![Command::ToggleMetrics],
            Key::L => vec![Command::ToggleLayerPanel],
            Key::Space => {
                self.space_down = true;
                Vec::new()
            }
        }
    }

    /// One finger pans; two fingers pinch-zoom about their midpoint
    fn touch_move(&mut self, touches: Vec<(f64, f64)>) -> Vec<Command> {
        let commands = match (self.touches.as_slice(), touches.as_slice()) {
            ([(ox, oy)], [(nx, ny)]) => vec![Command::Pan {
                dx: nx - ox,
                dy: ny - oy,
            }],
            ([a0, a1], [b0, b1]) => {
                let old_dist = ((a0.0 - a1.0).powi(2) + (a0.1 - a1.1).powi(2)).sqrt();
                let new_dist = ((b0.0 - b1.0).powi(2) + (b0.1 - b1.1).powi(2)).sqrt();
                if old_dist <= 0.0 {
                    Vec::new()
                } else {
                    vec![Command::ZoomAt {
                        x: (b0.0 + b1.0) / 2.0,
                        y: (b0.1 + b1.1) / 2.0,
                        factor: new_dist / old_dist,
                    }]
                }
            }
            _ => Vec::new(),
        };
        self.touches = touches;
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> InputController {
        InputController::new(800.0, 600.0)
    }

    #[test]
    fn wheel_zooms_at_the_cursor() {
        let mut c = controller();
        assert_eq!(
            c.handle(InputEvent::Wheel {
                x: 100.0,
                y: 50.0,
                delta: 1.0
            }),
            vec![Command::ZoomAt {
                x: 100.0,
                y: 50.0,
                factor: ZOOM_STEP_IN
            }]
        );
        assert_eq!(
            c.handle(InputEvent::Wheel {
                x: 100.0,
                y: 50.0,
                delta: -1.0
            }),
            vec![Command::ZoomAt {
                x: 100.0,
                y: 50.0,
                factor: ZOOM_STEP_OUT
            }]
        );
    }

    #[test]
    fn middle_drag_pans() {
        let mut c = controller();
        c.handle(InputEvent::MouseDown {
            x: 10.0,
            y: 10.0,
            button: MouseButton::Middle,
        });
        let cmds = c.handle(InputEvent::MouseMove { x: 25.0, y: 4.0 });
        assert_eq!(cmds, vec![Command::Pan { dx: 15.0, dy: -6.0 }]);
        c.handle(InputEvent::MouseUp {
            x: 25.0,
            y: 4.0,
            button: MouseButton::Middle,
        });
        assert!(c.handle(InputEvent::MouseMove { x: 40.0, y: 4.0 }).is_empty());
    }

    #[test]
    fn space_left_drag_pans_plain_left_does_not() {
        let mut c = controller();
        c.handle(InputEvent::MouseDown {
            x: 0.0,
            y: 0.0,
            button: MouseButton::Left,
        });
        assert!(c.handle(InputEvent::MouseMove { x: 5.0, y: 5.0 }).is_empty());
        c.handle(InputEvent::MouseUp {
            x: 5.0,
            y: 5.0,
            button: MouseButton::Left,
        });

        c.handle(InputEvent::KeyDown {
            key: Key::Space,
            shift: false,
        });
        c.handle(InputEvent::MouseDown {
            x: 0.0,
            y: 0.0,
            button: MouseButton::Left,
        });
        let cmds = c.handle(InputEvent::MouseMove { x: 3.0, y: 7.0 });
        assert_eq!(cmds, vec![Command::Pan { dx: 3.0, dy: 7.0 }]);
    }

    #[test]
    fn arrows_pan_a_tenth_of_the_view() {
        let mut c = controller();
        assert_eq!(
            c.handle(InputEvent::KeyDown {
                key: Key::ArrowLeft,
                shift: false
            }),
            vec![Command::Pan { dx: 80.0, dy: 0.0 }]
        );
        assert_eq!(
            c.handle(InputEvent::KeyDown {
                key: Key::ArrowDown,
                shift: false
            }),
            vec![Command::Pan { dx: 0.0, dy: -60.0 }]
        );
    }

    #[test]
    fn enter_zooms_about_the_center() {
        let mut c = controller();
        assert_eq!(
            c.handle(InputEvent::KeyDown {
                key: Key::Enter,
                shift: false
            }),
            vec![Command::ZoomAt {
                x: 400.0,
                y: 300.0,
                factor: ZOOM_STEP_IN
            }]
        );
        assert_eq!(
            c.handle(InputEvent::KeyDown {
                key: Key::Enter,
                shift: true
            }),
            vec![Command::ZoomAt {
                x: 400.0,
                y: 300.0,
                factor: ZOOM_STEP_OUT
            }]
        );
    }

    #[test]
    fn toggle_keys_emit_their_commands() {
        let mut c = controller();
        let one = |c: &mut InputController, key| {
            let cmds = c.handle(InputEvent::KeyDown { key, shift: false });
            assert_eq!(cmds.len(), 1);
            cmds[0]
        };
        assert_eq!(one(&mut c, Key::F), Command::Fit);
        assert_eq!(one(&mut c, Key::G), Command::ToggleGrid);
        assert_eq!(one(&mut c, Key::P), Command::ToggleMetrics);
        assert_eq!(one(&mut c, Key::L), Command::ToggleLayerPanel);
    }

    #[test]
    fn one_finger_drag_pans() {
        let mut c = controller();
        c.handle(InputEvent::TouchStart {
            touches: vec![(100.0, 100.0)],
        });
        let cmds = c.handle(InputEvent::TouchMove {
            touches: vec![(120.0, 90.0)],
        });
        assert_eq!(cmds, vec![Command::Pan { dx: 20.0, dy: -10.0 }]);
    }

    #[test]
    fn pinch_zooms_about_the_midpoint() {
        let mut c = controller();
        c.handle(InputEvent::TouchStart {
            touches: vec![(100.0, 100.0), (200.0, 100.0)],
        });
        let cmds = c.handle(InputEvent::TouchMove {
            touches: vec![(80.0, 100.0), (220.0, 100.0)],
        });
        match cmds.as_slice() {
            [Command::ZoomAt { x, y, factor }] => {
                assert_eq!((*x, *y), (150.0, 100.0));
                assert!((factor - 1.4).abs() < 1e-12);
            }
            other => panic!("expected a pinch zoom, got {:?}", other),
        }
    }
}
