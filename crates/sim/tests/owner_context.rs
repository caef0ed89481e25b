//! Two participants sharing one region.

use colonysync_core::{Command, FactionId, IdBlock, OwnerId, RegionId, Scope, SimTick};
use colonysync_sim::{
    CommandBody, DesignateTarget, DesignatorOrder, NoopHooks, Party, Region, Simulation,
    TimeSpeed, WorldState,
};

fn alice() -> FactionId {
    FactionId::new("Faction_A")
}

fn bob() -> FactionId {
    FactionId::new("Faction_B")
}

fn shared_region(local: &str) -> Simulation {
    let mut sim = Simulation::new(
        WorldState::new()
            .with_owner(OwnerId::new("Alice"), alice())
            .with_owner(OwnerId::new("Bob"), bob())
            .with_global_block(IdBlock::new(10, 10)),
        OwnerId::new(local),
        NoopHooks,
    );
    sim.insert_region(Region::new(RegionId(0), alice(), true));
    sim
}

fn region_cmd(body: CommandBody) -> Command {
    body.into_command(SimTick(0), Scope::Region(RegionId(0)))
}

fn designate(faction: FactionId, designator: &str, cells: Vec<i32>) -> Command {
    region_cmd(CommandBody::Designator(DesignatorOrder {
        designator: designator.into(),
        build_def: String::new(),
        faction,
        area: None,
        target: DesignateTarget::Cells(cells),
    }))
}

#[test]
fn bob_bootstrap_leaves_alice_untouched_and_keeps_his_designations() {
    let mut sim = shared_region("Alice");
    sim.execute(&designate(alice(), "Mine", vec![4])).unwrap();
    let before = sim
        .world()
        .region(RegionId(0))
        .and_then(|region| region.bundle(&alice()))
        .cloned()
        .unwrap();

    sim.execute(&region_cmd(CommandBody::RegionFactionData {
        owner: OwnerId::new("Bob"),
    }))
    .unwrap();
    sim.execute(&designate(bob(), "Mine", vec![5, 6])).unwrap();
    sim.execute(&designate(bob(), "ZoneAdd_Stockpile", vec![8, 9]))
        .unwrap();

    let region = sim.world().region(RegionId(0)).unwrap();
    assert_eq!(region.bundle(&alice()), Some(&before));
    let bobs = region.bundle(&bob()).unwrap();
    assert_eq!(bobs.designations.len(), 2);
    assert_eq!(bobs.zones.len(), 1);
    assert_eq!(region.active_faction(), Some(&alice()));
    assert_eq!(region.context_depth(), 0);
}

#[test]
fn first_designation_bootstraps_an_unseen_faction() {
    let mut sim = shared_region("Alice");
    sim.execute(&designate(bob(), "Mine", vec![1])).unwrap();
    let region = sim.world().region(RegionId(0)).unwrap();
    let bobs = region.bundle(&bob()).unwrap();
    assert_eq!(bobs.designations.len(), 1);
    assert!(bobs.areas.contains_key("Home"));
}

#[test]
fn nested_pushes_restore_in_order() {
    let mut region = Region::new(RegionId(0), alice(), true);
    region.push(Party::Player(bob()));
    assert_eq!(region.active_faction(), Some(&bob()));
    region.push(Party::Player(alice()));
    assert_eq!(region.active_faction(), Some(&alice()));
    assert_eq!(region.pop(), Some(bob()));
    assert_eq!(region.pop(), Some(alice()));
    assert_eq!(region.active_faction(), Some(&alice()));
    assert_eq!(region.context_depth(), 0);
}

#[test]
fn non_player_parties_never_touch_the_active_bundle() {
    let mut region = Region::new(RegionId(0), alice(), true);
    let before = region.active_bundle().cloned();
    {
        let scope = region.with_owner(Party::NonPlayer);
        assert_eq!(scope.active_faction(), Some(&alice()));
        assert_eq!(scope.context_depth(), 1);
    }
    assert_eq!(region.context_depth(), 0);
    assert_eq!(region.bundles().count(), 1);
    assert_eq!(region.active_bundle().cloned(), before);
    assert_eq!(region.active_faction(), Some(&alice()));
}

#[test]
fn unowned_faction_designations_stay_in_the_current_bundle() {
    let mut sim = shared_region("Bob");
    sim.execute(&region_cmd(CommandBody::RegionFactionData {
        owner: OwnerId::new("Bob"),
    }))
    .unwrap();
    assert_eq!(
        sim.world().region(RegionId(0)).unwrap().active_faction(),
        Some(&bob())
    );

    sim.execute(&designate(FactionId::new("Faction_Wild"), "Hunt", vec![3]))
        .unwrap();
    let region = sim.world().region(RegionId(0)).unwrap();
    assert!(region.bundle(&FactionId::new("Faction_Wild")).is_none());
    assert_eq!(region.bundle(&bob()).unwrap().designations.len(), 1);
}

#[test]
fn autosave_writes_the_parent_view_and_restores_the_local_one() {
    let mut sim = shared_region("Bob");
    sim.execute(&region_cmd(CommandBody::RegionFactionData {
        owner: OwnerId::new("Bob"),
    }))
    .unwrap();
    sim.schedule(CommandBody::Autosave.into_command(SimTick(0), Scope::Global));
    sim.step();

    let document = sim.take_autosave().expect("autosave document");
    assert!(sim.take_autosave().is_none());
    assert_eq!(sim.world().speed(), TimeSpeed::Paused);
    assert_eq!(document["world"]["timer"], 0);
    assert_eq!(sim.world().timer(), SimTick(1));
    assert!(document["regions"]["0"]["ownerBundles"]["Faction_B"].is_object());
    assert!(document["regions"]["0"]["ownerBundles"]["Faction_A"].is_null());

    let region = sim.world().region(RegionId(0)).unwrap();
    assert_eq!(region.active_faction(), Some(&bob()));
    assert!(sim.world().global_block().is_some());
    assert!(sim.ids().bound_scope().is_none());
}
