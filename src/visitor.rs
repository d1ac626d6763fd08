//! Depth-first traversal of the document tree.
//!
//! A pass implements [`Visitor`] and receives an explicit context value
//! threaded through every call. Each node kind has an enter hook that can
//! steer the walk and a leave hook that runs after the node's children.

use crate::model::{ControlEvent, Element, Layer, Measure, Staff};

/// Walk control returned by the enter hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Do not descend into this node's children (leave hook still runs)
    SkipChildren,
    /// Abort the whole walk
    Stop,
}

/// One pass over the tree. All hooks default to no-ops.
pub trait Visitor {
    type Context;

    fn enter_measure(&mut self, _measure: &mut Measure, _index: usize, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn leave_measure(&mut self, _measure: &mut Measure, _index: usize, _ctx: &mut Self::Context) {}

    fn enter_staff(&mut self, _staff: &mut Staff, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn leave_staff(&mut self, _staff: &mut Staff, _ctx: &mut Self::Context) {}

    fn enter_layer(&mut self, _layer: &mut Layer, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn leave_layer(&mut self, _layer: &mut Layer, _ctx: &mut Self::Context) {}

    fn enter_element(&mut self, _element: &mut Element, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn leave_element(&mut self, _element: &mut Element, _ctx: &mut Self::Context) {}

    /// Control events are visited after the staves of their measure.
    fn visit_control_event(&mut self, _event: &mut ControlEvent, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }
}

/// Visit `measures` in order; `first_index` is the document index of
/// `measures[0]`. Returns `Flow::Stop` if a hook aborted the walk.
pub fn walk_measures<V: Visitor>(
    visitor: &mut V,
    measures: &mut [Measure],
    first_index: usize,
    ctx: &mut V::Context,
) -> Flow {
    for (offset, measure) in measures.iter_mut().enumerate() {
        if walk_measure(visitor, measure, first_index + offset, ctx) == Flow::Stop {
            return Flow::Stop;
        }
    }
    Flow::Continue
}

pub fn walk_measure<V: Visitor>(
    visitor: &mut V,
    measure: &mut Measure,
    index: usize,
    ctx: &mut V::Context,
) -> Flow {
    match visitor.enter_measure(measure, index, ctx) {
        Flow::Stop => return Flow::Stop,
        Flow::SkipChildren => {}
        Flow::Continue => {
            for staff in measure.staves.iter_mut() {
                if walk_staff(visitor, staff, ctx) == Flow::Stop {
                    return Flow::Stop;
                }
            }
            for event in measure.control_events.iter_mut() {
                if visitor.visit_control_event(event, ctx) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
    }
    visitor.leave_measure(measure, index, ctx);
    Flow::Continue
}

fn walk_staff<V: Visitor>(visitor: &mut V, staff: &mut Staff, ctx: &mut V::Context) -> Flow {
    match visitor.enter_staff(staff, ctx) {
        Flow::Stop => return Flow::Stop,
        Flow::SkipChildren => {}
        Flow::Continue => {
            for layer in staff.layers.iter_mut() {
                if walk_layer(visitor, layer, ctx) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
    }
    visitor.leave_staff(staff, ctx);
    Flow::Continue
}

fn walk_layer<V: Visitor>(visitor: &mut V, layer: &mut Layer, ctx: &mut V::Context) -> Flow {
    match visitor.enter_layer(layer, ctx) {
        Flow::Stop => return Flow::Stop,
        Flow::SkipChildren => {}
        Flow::Continue => {
            for element in layer.elements.iter_mut() {
                if walk_element(visitor, element, ctx) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
    }
    visitor.leave_layer(layer, ctx);
    Flow::Continue
}

pub fn walk_element<V: Visitor>(visitor: &mut V, element: &mut Element, ctx: &mut V::Context) -> Flow {
    match visitor.enter_element(element, ctx) {
        Flow::Stop => return Flow::Stop,
        Flow::SkipChildren => {}
        Flow::Continue => {
            for child in element.children.iter_mut() {
                if walk_element(visitor, child, ctx) == Flow::Stop {
                    return Flow::Stop;
                }
            }
        }
    }
    visitor.leave_element(element, ctx);
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::Duration;
    use crate::model::{ElementKind, PitchName};

    /// Records enter/leave order by element id.
    struct Trace;

    impl Visitor for Trace {
        type Context = Vec<String>;

        fn enter_element(&mut self, element: &mut Element, ctx: &mut Vec<String>) -> Flow {
            ctx.push(format!("+{}", element.id.0));
            if matches!(element.kind, ElementKind::Tuplet(_)) {
                Flow::SkipChildren
            } else {
                Flow::Continue
            }
        }

        fn leave_element(&mut self, element: &mut Element, ctx: &mut Vec<String>) {
            ctx.push(format!("-{}", element.id.0));
        }

        fn leave_measure(&mut self, measure: &mut Measure, index: usize, ctx: &mut Vec<String>) {
            ctx.push(format!("m{}@{}", measure.id.0, index));
        }
    }

    fn measure() -> Measure {
        let beam = Element::new(10, ElementKind::Beam).with_children(vec![
            Element::note(11, Duration::Eighth, PitchName::C, 4),
            Element::note(12, Duration::Eighth, PitchName::D, 4),
        ]);
        let tuplet = Element::new(20, ElementKind::Tuplet(crate::model::Tuplet { num: 3, num_base: 2 }))
            .with_children(vec![Element::note(21, Duration::Eighth, PitchName::E, 4)]);
        Measure::new(1, vec![Staff::new(2, 1, vec![Layer::new(3, 1, vec![beam, tuplet])])])
    }

    #[test]
    fn enter_leave_order() {
        let mut measures = vec![measure()];
        let mut trace = Vec::new();
        walk_measures(&mut Trace, &mut measures, 5, &mut trace);
        assert_eq!(trace, vec!["+10", "+11", "-11", "+12", "-12", "-10", "+20", "-20", "m1@5"]);
    }

    struct StopAt(u32);

    impl Visitor for StopAt {
        type Context = usize;

        fn enter_element(&mut self, element: &mut Element, ctx: &mut usize) -> Flow {
            *ctx += 1;
            if element.id.0 == self.0 { Flow::Stop } else { Flow::Continue }
        }
    }

    #[test]
    fn stop_aborts_walk() {
        let mut measures = vec![measure(), measure()];
        let mut visited = 0;
        let flow = walk_measures(&mut StopAt(11), &mut measures, 0, &mut visited);
        assert_eq!(flow, Flow::Stop);
        assert_eq!(visited, 2);
    }
}
