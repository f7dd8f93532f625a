//! Procedural vehicle definitions.
//!
//! These stand in for parsed content in tests, benches and the demo. Each
//! preset is an ordinary [`ActorDef`] and goes through the same validation
//! and spawning path as definitions coming from the content layer.

use crate::definition::{
    ActorDef, AxleDef, BeamDef, BeamKindDef, CabDef, ControlSurface, DiffMode, DriveableKind,
    EngineKind, NodeDef, PowertrainDef, PropellerDef, ScrewpropDef, SectionConfig, TransmissionMode,
    TurboDef, TyreDef, WheelDef, WingDef,
};
use glam::Vec3;

/// Rim nodes per preset wheel.
const RIM_NODES: usize = 12;

/// Names accepted by [`by_name`].
pub const PRESET_NAMES: [&str; 5] = ["truck", "car", "crate", "boat", "plane"];

/// Look up a preset by name.
pub fn by_name(name: &str) -> Option<ActorDef> {
    match name {
        "truck" => Some(truck()),
        "car" => Some(car()),
        "crate" => Some(crate_box()),
        "boat" => Some(boat()),
        "plane" => Some(plane()),
        _ => None,
    }
}

struct Builder {
    def: ActorDef,
}

impl Builder {
    fn new(name: &str, driveable: DriveableKind) -> Self {
        let mut def = ActorDef::new(name);
        def.driveable = driveable;
        Self { def }
    }

    fn node(&mut self, position: Vec3, mass: f32) -> usize {
        self.def.nodes.push(NodeDef::new(position, mass));
        self.def.nodes.len() - 1
    }

    fn position(&self, node: usize) -> Vec3 {
        self.def.nodes[node].position
    }

    fn beam(&mut self, a: usize, b: usize, template: &BeamDef) {
        self.def.beams.push(BeamDef { nodes: [a, b], ..template.clone() });
    }

    /// Connect every pair of `nodes`.
    fn brace_all(&mut self, nodes: &[usize], template: &BeamDef) {
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                self.beam(a, b, template);
            }
        }
    }

    /// Add a cab triangle wound so its normal points away from `inside`.
    fn face(&mut self, mut nodes: [usize; 3], inside: Vec3, buoyant: bool) {
        let [a, b, c] = nodes.map(|i| self.position(i));
        if (b - a).cross(c - a).dot(a - inside) < 0.0 {
            nodes.swap(1, 2);
        }
        self.def.cab_triangles.push(CabDef { nodes, buoyant, module: None });
    }

    /// Both triangles of a quad given in perimeter order.
    fn quad(&mut self, [a, b, c, d]: [usize; 4], inside: Vec3, buoyant: bool) {
        self.face([a, b, c], inside, buoyant);
        self.face([a, c, d], inside, buoyant);
    }

    /// A wheel in the plane `x = centre.x`, rolling toward +Z, with its hub
    /// hung from `mounts` by shock beams.
    fn wheel(&mut self, spec: &WheelSpec, centre: Vec3, mounts: &[usize]) -> usize {
        let inner_x = centre.x - spec.hub_offset * centre.x.signum();
        let outer_x = centre.x + spec.hub_offset * centre.x.signum();
        let (low_x, high_x) = (inner_x.min(outer_x), inner_x.max(outer_x));
        let a = self.node(Vec3::new(low_x, centre.y, centre.z), spec.hub_mass);
        let b = self.node(Vec3::new(high_x, centre.y, centre.z), spec.hub_mass);
        self.beam(a, b, &BeamDef::new(a, b).unbreakable());

        let tyre = BeamDef::new(0, 0).with_rates(spec.tyre_spring, spec.tyre_damp).unbreakable();
        let tread = BeamDef::new(0, 0)
            .with_rates(spec.tyre_spring, spec.tyre_damp * 0.5)
            .unbreakable();
        let mut rim = Vec::with_capacity(RIM_NODES);
        for k in 0..RIM_NODES {
            let angle = k as f32 / RIM_NODES as f32 * std::f32::consts::TAU;
            let p = centre + Vec3::new(0.0, angle.cos(), angle.sin()) * spec.radius;
            let n = self.node(p, spec.rim_mass);
            self.beam(n, a, &tyre);
            self.beam(n, b, &tyre);
            rim.push(n);
        }
        for k in 0..RIM_NODES {
            self.beam(rim[k], rim[(k + 1) % RIM_NODES], &tread);
        }

        let shock = BeamDef::new(0, 0)
            .with_rates(spec.shock_spring, spec.shock_damp)
            .with_kind(BeamKindDef::Shock { shorten: 0.3, lengthen: 0.3 });
        for &m in mounts {
            self.beam(a, m, &shock);
            self.beam(b, m, &shock);
        }

        self.def.wheels.push(WheelDef {
            axis: [a, b],
            rim,
            radius: spec.radius,
            driven: false,
            braked: true,
            steered: false,
            inertia: None,
            tyre: TyreDef::default(),
            module: None,
        });
        self.def.wheels.len() - 1
    }

    fn finish(self) -> ActorDef {
        self.def
    }
}

struct WheelSpec {
    radius: f32,
    hub_offset: f32,
    hub_mass: f32,
    rim_mass: f32,
    tyre_spring: f32,
    tyre_damp: f32,
    shock_spring: f32,
    shock_damp: f32,
}

/// Box-frame chassis dimensions shared by the road vehicles.
struct ChassisSpec {
    name: &'static str,
    /// Z of each frame slice, rear to front.
    slices: &'static [f32],
    half_width: f32,
    bottom: f32,
    top: f32,
    node_mass: f32,
    /// Hub centres: half track and the two axle positions (rear, front).
    track: f32,
    axles: [f32; 2],
    wheel: WheelSpec,
}

/// Frame lattice, bumpers and four wheels. Wheel order: front-left,
/// front-right, rear-left, rear-right.
fn road_vehicle(spec: &ChassisSpec) -> Builder {
    let mut b = Builder::new(spec.name, DriveableKind::Truck);
    let frame = BeamDef { strength: 1.0, ..BeamDef::new(0, 0) };

    // slice -> [bottom-left, bottom-right, top-right, top-left]
    let mut slices: Vec<[usize; 4]> = Vec::with_capacity(spec.slices.len());
    for &z in spec.slices {
        let w = spec.half_width;
        slices.push([
            b.node(Vec3::new(-w, spec.bottom, z), spec.node_mass),
            b.node(Vec3::new(w, spec.bottom, z), spec.node_mass),
            b.node(Vec3::new(w, spec.top, z), spec.node_mass),
            b.node(Vec3::new(-w, spec.top, z), spec.node_mass),
        ]);
    }
    for pair in slices.windows(2) {
        let cell: Vec<usize> = pair[0].iter().chain(pair[1].iter()).copied().collect();
        b.brace_all(&cell, &frame);
    }
    // The middle of the bottom of the frame.
    b.def.ref_node = slices[spec.slices.len() / 2][0];

    let inside = Vec3::new(0.0, (spec.bottom + spec.top) * 0.5, 0.0);
    let front = slices[slices.len() - 1];
    let front_z = spec.slices[spec.slices.len() - 1];
    let rear = slices[0];
    let rear_z = spec.slices[0];
    let height = spec.top - spec.bottom;

    // Pointed nose: a fan of four faces in front of the last slice.
    let nose =
        b.node(Vec3::new(0.0, spec.bottom + height * 0.33, front_z + 0.4), spec.node_mass * 0.3);
    let behind = slices[slices.len() - 2];
    for &n in front.iter().chain(behind.iter()) {
        b.beam(nose, n, &frame);
    }
    for k in 0..4 {
        b.face([nose, front[k], front[(k + 1) % 4]], inside, false);
    }

    // Flat rear plate, a little wider than the frame.
    let w = spec.half_width * 1.2;
    let plate_z = rear_z - 0.2;
    let plate = [
        b.node(Vec3::new(-w, spec.bottom - 0.1, plate_z), spec.node_mass * 0.35),
        b.node(Vec3::new(w, spec.bottom - 0.1, plate_z), spec.node_mass * 0.35),
        b.node(Vec3::new(w, spec.top + 0.1, plate_z), spec.node_mass * 0.35),
        b.node(Vec3::new(-w, spec.top + 0.1, plate_z), spec.node_mass * 0.35),
    ];
    b.brace_all(&plate, &frame);
    for &p in &plate {
        for &n in rear.iter().chain(slices[1].iter()) {
            b.beam(p, n, &frame);
        }
    }
    b.quad(plate, inside, false);

    // Each hub hangs from the four frame nodes of its side around it.
    let side_nodes = |x: f32, z: f32| -> Vec<usize> {
        let side = if x < 0.0 { [0, 3] } else { [1, 2] };
        let after =
            spec.slices.iter().position(|&s| s >= z).unwrap_or(spec.slices.len() - 1).max(1);
        let mut out = Vec::with_capacity(4);
        for slice in [&slices[after - 1], &slices[after]] {
            out.push(slice[side[0]]);
            out.push(slice[side[1]]);
        }
        out
    };
    let [rear_axle, front_axle] = spec.axles;
    for (x, z) in [
        (-spec.track, front_axle),
        (spec.track, front_axle),
        (-spec.track, rear_axle),
        (spec.track, rear_axle),
    ] {
        let mounts = side_nodes(x, z);
        b.wheel(&spec.wheel, Vec3::new(x, spec.wheel.radius, z), &mounts);
    }
    b.def.wheels[0].steered = true;
    b.def.wheels[1].steered = true;
    b.def.wheels[2].driven = true;
    b.def.wheels[3].driven = true;
    b.def.axles.push(AxleDef {
        wheels: [2, 3],
        modes: vec![DiffMode::Open, DiffMode::Locked, DiffMode::Split],
    });
    b
}

/// A four-wheel truck of about 3.8 t with a diesel
/// powertrain. The `loaded` section config adds a ballast load.
pub fn truck() -> ActorDef {
    let spec = ChassisSpec {
        name: "truck",
        slices: &[-3.0, -1.0, 1.0, 3.0],
        half_width: 1.0,
        bottom: 1.0,
        top: 2.2,
        node_mass: 180.0,
        track: 1.25,
        axles: [-2.2, 2.2],
        wheel: WheelSpec {
            radius: 0.5,
            hub_offset: 0.2,
            hub_mass: 30.0,
            rim_mass: 8.0,
            tyre_spring: 4.0e5,
            tyre_damp: 1.0e3,
            shock_spring: 1.5e5,
            shock_damp: 5.0e3,
        },
    };
    let mut b = road_vehicle(&spec);

    // Ballast on the bed, only in the loaded config.
    let top: Vec<usize> = (0..b.def.nodes.len())
        .filter(|&i| b.position(i).y == spec.top && b.position(i).z < 0.0)
        .collect();
    for z in [-2.5, -1.5] {
        let ballast = b.def.nodes.len();
        b.def.nodes.push(NodeDef {
            module: Some("cargo".into()),
            ..NodeDef::new(Vec3::new(0.0, 2.6, z), 400.0)
        });
        for &n in &top {
            b.def.beams.push(BeamDef { module: Some("cargo".into()), ..BeamDef::new(ballast, n) });
        }
    }
    b.def.section_configs = vec![
        SectionConfig { name: "standard".into(), modules: vec![] },
        SectionConfig { name: "loaded".into(), modules: vec!["cargo".into()] },
    ];

    b.def.powertrain = Some(PowertrainDef {
        kind: EngineKind::Truck,
        torque: 1800.0,
        idle_rpm: 800.0,
        max_rpm: 2200.0,
        stall_rpm: None,
        diff_ratio: 4.0,
        gear_ratios: vec![9.0, 0.0, 9.0, 6.0, 4.0, 2.7, 1.8, 1.2],
        clutch_force: None,
        clutch_time: None,
        shift_time: None,
        post_shift_time: None,
        inertia: None,
        braking_torque: None,
        torque_curve: vec![(0.0, 0.3), (0.4, 0.9), (0.6, 1.0), (0.9, 0.85), (1.0, 0.6)],
        turbo: Some(TurboDef { extra_torque: 200.0, ..TurboDef::default() }),
        air_brakes: None,
        transmission: TransmissionMode::Automatic,
        max_idle_mixture: None,
        min_idle_mixture: None,
        start_running: false,
    });
    b.finish()
}

/// A 1.2 t rear-wheel-drive car with a five-speed automatic, running at
/// spawn. Peak torque sits at 70 % of the rpm range.
pub fn car() -> ActorDef {
    let spec = ChassisSpec {
        name: "car",
        slices: &[-2.0, 0.0, 2.0],
        half_width: 0.8,
        bottom: 0.5,
        top: 1.3,
        node_mass: 80.0,
        track: 0.95,
        axles: [-1.4, 1.4],
        wheel: WheelSpec {
            radius: 0.32,
            hub_offset: 0.12,
            hub_mass: 10.0,
            rim_mass: 2.0,
            tyre_spring: 2.0e5,
            tyre_damp: 300.0,
            shock_spring: 5.0e4,
            shock_damp: 2.0e3,
        },
    };
    let mut b = road_vehicle(&spec);
    b.def.powertrain = Some(PowertrainDef {
        kind: EngineKind::Car,
        torque: 300.0,
        idle_rpm: 800.0,
        max_rpm: 6000.0,
        stall_rpm: None,
        diff_ratio: 3.5,
        gear_ratios: vec![3.0, 0.0, 3.6, 2.1, 1.4, 1.0, 0.8],
        clutch_force: None,
        clutch_time: None,
        shift_time: Some(0.3),
        post_shift_time: None,
        inertia: Some(0.1),
        braking_torque: None,
        torque_curve: vec![(0.0, 0.4), (0.3, 0.7), (0.7, 1.0), (1.0, 0.7)],
        turbo: None,
        air_brakes: None,
        transmission: TransmissionMode::Automatic,
        max_idle_mixture: None,
        min_idle_mixture: None,
        start_running: true,
    });
    b.finish()
}

/// A 1 m cube of 400 kg with all six faces as (buoyant) cab triangles.
pub fn crate_box() -> ActorDef {
    let mut b = Builder::new("crate", DriveableKind::NotDriveable);
    let mut corners = [0usize; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let x = if i & 1 == 0 { -0.5 } else { 0.5 };
        let y = if i & 2 == 0 { 0.0 } else { 1.0 };
        let z = if i & 4 == 0 { -0.5 } else { 0.5 };
        *corner = b.node(Vec3::new(x, y, z), 50.0);
    }
    b.brace_all(&corners, &BeamDef::new(0, 0));
    box_faces(&mut b, &corners, Vec3::new(0.0, 0.5, 0.0), true);
    b.finish()
}

/// Six cab quads of a box whose corners are indexed by the bit pattern
/// `x | y << 1 | z << 2`.
fn box_faces(b: &mut Builder, c: &[usize; 8], inside: Vec3, buoyant: bool) {
    for quad in [
        [0, 1, 3, 2], // -Z
        [4, 5, 7, 6], // +Z
        [0, 2, 6, 4], // -X
        [1, 3, 7, 5], // +X
        [0, 1, 5, 4], // -Y
        [2, 3, 7, 6], // +Y
    ] {
        b.quad(quad.map(|i| c[i]), inside, buoyant);
    }
}

/// A 2 t hull (6 m x 2.4 m x 1.2 m) with a stern screw propeller.
pub fn boat() -> ActorDef {
    let mut b = Builder::new("boat", DriveableKind::Boat);
    let mut corners = [0usize; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let x = if i & 1 == 0 { -1.2 } else { 1.2 };
        let y = if i & 2 == 0 { 0.0 } else { 1.2 };
        let z = if i & 4 == 0 { -3.0 } else { 3.0 };
        *corner = b.node(Vec3::new(x, y, z), 250.0);
    }
    let screw = b.node(Vec3::new(0.0, 0.05, -3.2), 50.0);
    let back = b.node(Vec3::new(0.0, 0.05, -3.8), 50.0);
    let up = b.node(Vec3::new(0.0, 1.2, -3.8), 50.0);
    let all: Vec<usize> = corners.iter().copied().chain([screw, back, up]).collect();
    b.brace_all(&all, &BeamDef::new(0, 0));
    box_faces(&mut b, &corners, Vec3::new(0.0, 0.6, 0.0), true);
    b.def.screwprops.push(ScrewpropDef {
        ref_node: screw,
        back_node: back,
        up_node: up,
        power: 12_000.0,
    });
    b.def.ref_node = corners[0];
    b.finish()
}

/// A light single-engine plane on skids: split main wing with ailerons,
/// elevator and a nose propeller.
pub fn plane() -> ActorDef {
    let mut b = Builder::new("plane", DriveableKind::Airplane);
    let nose = b.node(Vec3::new(0.0, 1.2, 3.0), 100.0);
    let prop_back = b.node(Vec3::new(0.0, 1.2, 2.4), 40.0);
    let tail = b.node(Vec3::new(0.0, 1.2, -4.0), 80.0);

    let lead_left = b.node(Vec3::new(-5.0, 1.4, 0.5), 50.0);
    let lead_mid = b.node(Vec3::new(0.0, 1.4, 0.5), 100.0);
    let lead_right = b.node(Vec3::new(5.0, 1.4, 0.5), 50.0);
    let trail_left = b.node(Vec3::new(-5.0, 1.4, -0.7), 50.0);
    let trail_mid = b.node(Vec3::new(0.0, 1.4, -0.7), 100.0);
    let trail_right = b.node(Vec3::new(5.0, 1.4, -0.7), 50.0);

    let el_ll = b.node(Vec3::new(-1.5, 1.3, -3.3), 40.0);
    let el_lr = b.node(Vec3::new(1.5, 1.3, -3.3), 40.0);
    let el_tl = b.node(Vec3::new(-1.5, 1.3, -4.0), 40.0);
    let el_tr = b.node(Vec3::new(1.5, 1.3, -4.0), 40.0);

    let skid_left = b.node(Vec3::new(-1.2, 0.0, 0.6), 60.0);
    let skid_right = b.node(Vec3::new(1.2, 0.0, 0.6), 60.0);
    let tail_skid = b.node(Vec3::new(0.0, 0.6, -3.8), 40.0);
    for skid in [skid_left, skid_right, tail_skid] {
        b.def.nodes[skid].friction = Some(0.2);
    }

    let all: Vec<usize> = (0..b.def.nodes.len()).collect();
    b.brace_all(&all, &BeamDef::new(0, 0).with_rates(3.0e6, 3.0e3));

    b.def.wings = vec![
        WingDef {
            nodes: [lead_left, lead_mid, trail_left, trail_mid],
            control: ControlSurface::Aileron { sign: 1.0 },
            max_deflection: 15.0,
            lift_slope: std::f32::consts::TAU,
        },
        WingDef {
            nodes: [lead_mid, lead_right, trail_mid, trail_right],
            control: ControlSurface::Aileron { sign: -1.0 },
            max_deflection: 15.0,
            lift_slope: std::f32::consts::TAU,
        },
        WingDef {
            nodes: [el_ll, el_lr, el_tl, el_tr],
            control: ControlSurface::Elevator,
            max_deflection: 20.0,
            lift_slope: std::f32::consts::TAU,
        },
    ];
    b.def.propellers.push(PropellerDef {
        ref_node: nose,
        back_node: prop_back,
        power: 120_000.0,
        spool_time: 2.0,
    });
    b.def.disable_drag = true;
    b.def.ref_node = tail;
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorId, StepContext};
    use crate::config::SimConfig;
    use crate::ground::{FlatTerrain, GroundModel};
    use crate::spawner::{build_actor, Placement};

    #[test]
    fn test_all_presets_validate() {
        for name in PRESET_NAMES {
            let def = by_name(name).unwrap();
            assert_eq!(def.name, name);
            let selected = def.select_section(None).unwrap();
            assert!(selected.validate().is_ok(), "{name} failed validation");
        }
        assert!(by_name("zeppelin").is_none());
    }

    #[test]
    fn test_truck_layout() {
        let def = truck();
        assert_eq!(def.wheels.len(), 4);
        assert!(def.wheels.iter().all(|w| w.rim.len() == RIM_NODES));
        let mass = def.select_section(None).unwrap().total_mass();
        assert!(mass > 3000.0 && mass < 4500.0, "truck mass {mass}");
        let loaded = def.select_section(Some("loaded")).unwrap();
        assert!((loaded.total_mass() - mass - 800.0).abs() < 1e-2);
        // Wheels roll toward +Z
        for w in &def.wheels {
            let axis = def.nodes[w.axis[1]].position - def.nodes[w.axis[0]].position;
            assert!(axis.cross(Vec3::Y).z > 0.0);
        }
    }

    #[test]
    fn test_faces_point_outward() {
        let def = crate_box();
        let centre = Vec3::new(0.0, 0.5, 0.0);
        assert_eq!(def.cab_triangles.len(), 12);
        for cab in &def.cab_triangles {
            let [a, b, c] = cab.nodes.map(|i| def.nodes[i].position);
            assert!((b - a).cross(c - a).dot(a - centre) > 0.0);
        }
    }

    #[test]
    fn test_truck_rests_on_its_wheels() {
        let config = SimConfig::default();
        let terrain = FlatTerrain::new("flat");
        let metal = GroundModel::metal();
        let mut actor =
            build_actor(ActorId(0), &truck(), None, Placement::default(), &config, Some(&terrain))
                .unwrap();
        let ctx = StepContext {
            config: &config,
            terrain: &terrain,
            fallback_material: &metal,
            dt: config.fixed_dt,
        };
        for _ in 0..4000 {
            actor.step(&ctx);
        }
        assert!(actor.nodes.iter().all(|n| n.position.is_finite() && n.position.y > -0.05));
        assert!(actor.beams.iter().all(|b| !b.broken));
        assert!(actor.wheels.iter().all(|w| w.in_contact));
        // Frame still above the wheels
        let ref_y = actor.reference_position().y;
        assert!(ref_y > 0.7 && ref_y < 1.1, "frame height {ref_y}");
    }

    #[test]
    fn test_boat_floats() {
        let config = SimConfig::default();
        let mut terrain = FlatTerrain::new("sea").with_water(0.0);
        terrain.height = -20.0;
        let metal = GroundModel::metal();
        let mut actor =
            build_actor(ActorId(0), &boat(), None, Placement::default(), &config, None).unwrap();
        let ctx = StepContext {
            config: &config,
            terrain: &terrain,
            fallback_material: &metal,
            dt: config.fixed_dt,
        };
        for _ in 0..6000 {
            actor.step(&ctx);
        }
        let y = actor.center_of_mass().y;
        assert!(y > -0.5 && y < 1.2, "boat centre at {y}");
    }
}
