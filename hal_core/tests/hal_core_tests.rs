//! End-to-end behaviour of the HAL core across handles and processes' views.

use hal::config::HalConfig;
use hal::types::{CompType, HalType, HalValue, ObjectKind, ParamDir, PinDir};
use hal_core::{
    FunctCallback, Hal, HalError, HalGuard, HalResult, InstanceCtor, InstanceDtor, InstanceInfo,
    PinRecord, SigRecord, arena_path,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

fn new_hal() -> (tempfile::TempDir, Hal) {
    let dir = tempfile::tempdir().unwrap();
    let hal = Hal::create(&HalConfig::in_dir(dir.path())).unwrap();
    (dir, hal)
}

#[test]
fn foo_bar_baz_scenario() {
    let (_dir, hal) = new_hal();
    let (pin, sig) = {
        let mut g = hal.lock();
        let foo = g.register_component("foo", CompType::User).unwrap();
        let pin = g.create_pin(foo, "foo.bar", HalType::Float, PinDir::Out).unwrap();
        let sig = g.create_signal("baz", HalType::Float).unwrap();
        g.link_pin(pin, sig).unwrap();
        (pin, sig)
    };
    let bar = hal.pin::<f64>(pin).unwrap();
    let baz = hal.signal::<f64>(sig).unwrap();

    bar.set(3.5);
    assert_eq!(baz.get(), 3.5);

    hal.lock().unlink_pin(pin).unwrap();
    assert_eq!(bar.get(), 3.5);
    bar.set(-1.0);
    assert_eq!(baz.get(), 3.5);
    assert_eq!(hal.lock().signal_info(sig).unwrap().writers, 0);
}

#[test]
fn signal_writes_reach_linked_pins() {
    let (_dir, hal) = new_hal();
    let (pin, sig) = {
        let mut g = hal.lock();
        let c = g.register_component("rd", CompType::User).unwrap();
        let pin = g.create_pin(c, "rd.in", HalType::U32, PinDir::In).unwrap();
        let sig = g.create_signal("rd.sig", HalType::U32).unwrap();
        g.link_pin(pin, sig).unwrap();
        g.set_signal(sig, HalValue::U32(42)).unwrap();
        (pin, sig)
    };
    assert_eq!(hal.pin::<u32>(pin).unwrap().get(), 42);
    hal.lock().unlink_pin(pin).unwrap();
    hal.lock().set_signal(sig, HalValue::U32(7)).unwrap();
    assert_eq!(hal.pin::<u32>(pin).unwrap().get(), 42);
}

#[test]
fn deleting_signal_reverts_every_pin() {
    let (_dir, hal) = new_hal();
    let mut g = hal.lock();
    let c = g.register_component("n", CompType::User).unwrap();
    let sig = g.create_signal("n.sig", HalType::S32).unwrap();
    let driver = g.create_pin(c, "n.out", HalType::S32, PinDir::Out).unwrap();
    g.link_pin(driver, sig).unwrap();
    let mut pins = vec![driver];
    for i in 0..5 {
        let p = g.create_pin(c, &format!("n.in{i}"), HalType::S32, PinDir::In).unwrap();
        g.link_pin(p, sig).unwrap();
        pins.push(p);
    }
    g.pin::<i32>(driver).unwrap().set(-17);

    assert_eq!(g.pins_of_signal(sig).unwrap().len(), 6);
    g.delete_signal(sig).unwrap();
    let unlinked = pins
        .iter()
        .filter(|p| {
            let info = g.pin_info(**p).unwrap();
            info.signal.is_none() && info.value == HalValue::S32(-17)
        })
        .count();
    assert_eq!(unlinked, 6);
    assert!(g.find::<SigRecord>("n.sig").is_none());
}

#[test]
fn thread_runs_functions_in_list_order() {
    let (_dir, hal) = new_hal();
    let trace = Arc::new(Mutex::new(Vec::new()));
    let (t, f) = {
        let mut g = hal.lock();
        let c = g.register_component("ord", CompType::Realtime).unwrap();
        let t = g.create_thread("ord.thread", 1_000_000, 50, None).unwrap();
        let mut f = Vec::new();
        for name in ["F1", "F2", "F3"] {
            let trace = trace.clone();
            let h = g
                .export_funct(
                    c,
                    name,
                    FunctCallback::legacy(move |_| trace.lock().push(name)),
                    false,
                    false,
                )
                .unwrap();
            g.add_funct_to_thread(h, t, -1).unwrap();
            f.push(h);
        }
        (t, f)
    };

    hal.run_thread_cycle(t).unwrap();
    assert_eq!(*trace.lock(), ["F1", "F2", "F3"]);

    {
        let mut g = hal.lock();
        g.remove_funct_from_thread(f[1], t).unwrap();
        g.add_funct_to_thread(f[1], t, -1).unwrap();
    }
    trace.lock().clear();
    hal.run_thread_cycle(t).unwrap();
    assert_eq!(*trace.lock(), ["F1", "F3", "F2"]);

    let info = hal.lock().funct_info(f[0]).unwrap();
    assert!(info.maxtime >= info.runtime);
    assert_eq!(hal.lock().thread_info(t).unwrap().cycles, 2);
}

#[test]
fn default_instance_teardown_removes_owned_objects() {
    let (_dir, hal) = new_hal();
    let ctor: InstanceCtor = Arc::new(
        |g: &mut HalGuard<'_>, info: &InstanceInfo, args: &[&str]| -> HalResult<()> {
            let n = &info.name;
            g.create_pin(info.handle, &format!("{n}.in"), HalType::Float, PinDir::In)?;
            g.create_pin(info.handle, &format!("{n}.out"), HalType::Float, PinDir::Out)?;
            g.create_param(info.handle, &format!("{n}.k"), HalType::Float, ParamDir::Rw)?;
            g.export_funct(
                info.handle,
                &format!("{n}.update"),
                FunctCallback::legacy(|_| {}),
                true,
                false,
            )?;
            assert_eq!(args, ["k=2"]);
            Ok(())
        },
    );

    let mut g = hal.lock();
    let comp = g.register_instantiable("scale", ctor, None).unwrap();
    let inst = g.create_instance(comp, "sc0", 32, &["k=2"]).unwrap();
    let names = ["sc0.in", "sc0.out", "sc0.k", "sc0.update"];
    for name in names {
        let obj = g.find_by_name(None, name).unwrap();
        assert_eq!(g.owner_of(obj), Some(inst.id()));
    }

    g.delete_instance(inst).unwrap();
    for name in names.iter().chain(&["sc0"]) {
        assert!(g.find_by_name(None, name).is_none(), "{name} still registered");
    }
    assert!(g.find_by_name(Some(ObjectKind::Component), "scale").is_some());
}

fn two_pin_ctor() -> InstanceCtor {
    Arc::new(
        |g: &mut HalGuard<'_>, info: &InstanceInfo, _args: &[&str]| -> HalResult<()> {
            g.create_pin(info.handle, &format!("{}.a", info.name), HalType::S32, PinDir::In)?;
            g.create_pin(info.handle, &format!("{}.b", info.name), HalType::S32, PinDir::Out)?;
            Ok(())
        },
    )
}

#[test]
fn failing_destructor_still_tears_down_instance() {
    let (_dir, hal) = new_hal();
    let dtor: InstanceDtor = Arc::new(|g: &mut HalGuard<'_>, info: &InstanceInfo| -> HalResult<()> {
        let a = g
            .find::<PinRecord>(&format!("{}.a", info.name))
            .ok_or_else(|| HalError::NotFound("a".into()))?;
        g.delete_pin(a)?;
        Err(HalError::InvalidArgument("hardware did not answer".into()))
    });

    let mut g = hal.lock();
    let comp = g.register_instantiable("drv", two_pin_ctor(), Some(dtor)).unwrap();
    let inst = g.create_instance(comp, "drv0", 16, &[]).unwrap();
    g.delete_instance(inst).unwrap();
    for name in ["drv0", "drv0.a", "drv0.b"] {
        assert!(g.find_by_name(None, name).is_none(), "{name} still registered");
    }
    assert!(g.is_live(comp));
}

#[test]
fn blocked_component_unload_leaves_everything_in_place() {
    let (_dir, hal) = new_hal();
    let mut g = hal.lock();
    let comp = g.register_instantiable("axis", two_pin_ctor(), None).unwrap();
    let inst = g.create_instance(comp, "axis0", 0, &[]).unwrap();
    let own = g.create_pin(comp, "axis.enable", HalType::Bit, PinDir::In).unwrap();
    let vt = g.export_vtable("axis.ops", 1, comp, Arc::new(0u8)).unwrap();
    g.reference_vtable::<u8>("axis.ops", 1).unwrap();
    let before = g.objects(None).len();

    assert!(matches!(
        g.unregister_component(comp),
        Err(HalError::Busy { .. })
    ));
    assert_eq!(g.objects(None).len(), before);
    assert!(g.is_live(inst) && g.is_live(own) && g.is_live(comp));
    assert!(g.find_by_name(None, "axis0.b").is_some());

    g.unreference_vtable(vt).unwrap();
    g.unregister_component(comp).unwrap();
    assert!(g.objects(None).is_empty());
}

#[test]
fn stale_accessor_cannot_reach_reused_pin() {
    let dir = tempfile::tempdir().unwrap();
    let config = HalConfig::in_dir(dir.path());
    let owner = Hal::create(&config).unwrap();
    let other = Hal::attach(&config).unwrap();
    let (c, a) = {
        let mut g = owner.lock();
        let c = g.register_component("c", CompType::User).unwrap();
        let a = g.create_pin(c, "c.a", HalType::U32, PinDir::Out).unwrap();
        (c, a)
    };
    let acc = other.pin::<u32>(a).unwrap();
    let b = {
        let mut g = owner.lock();
        g.delete_pin(a).unwrap();
        g.create_pin(c, "c.b", HalType::U32, PinDir::Out).unwrap()
    };
    assert_eq!(b.offset(), a.offset());

    acc.set(5);
    assert_eq!(owner.pin::<u32>(b).unwrap().get(), 0);
    assert!(!acc.is_valid());
    assert!(matches!(acc.try_set(5), Err(HalError::NotFound(_))));
}

#[test]
fn tracing_can_be_initialized_twice() {
    let shared = hal::config::SharedConfig::default();
    hal_core::init_tracing(&shared);
    hal_core::init_tracing(&shared);
}

#[test]
fn concurrent_create_delete_keeps_list_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let config = HalConfig::in_dir(dir.path());
    let owner = Hal::create(&config).unwrap();
    let other = Hal::attach(&config).unwrap();

    fn churn(hal: &Hal, prefix: &str) -> BTreeSet<String> {
        let mut kept = BTreeSet::new();
        for i in 0..200 {
            let name = format!("{prefix}.{i}");
            let sig = hal.lock().create_signal(&name, HalType::Bit).unwrap();
            if i % 3 == 0 {
                hal.lock().delete_signal(sig).unwrap();
            } else {
                kept.insert(name);
            }
        }
        kept
    }

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| churn(&owner, "a"));
        let b = s.spawn(|| churn(&other, "b"));
        (a.join().unwrap(), b.join().unwrap())
    });

    let expected: BTreeSet<String> = a.union(&b).cloned().collect();
    let listed: BTreeSet<String> = owner
        .snapshot()
        .objects
        .into_iter()
        .map(|o| o.name)
        .collect();
    assert_eq!(listed, expected);
    let g = other.lock();
    assert_eq!(g.objects(Some(ObjectKind::Signal)).len(), expected.len());
}

#[test]
fn attached_handle_sees_owner_objects() {
    let dir = tempfile::tempdir().unwrap();
    let config = HalConfig::in_dir(dir.path());
    let owner = Hal::create(&config).unwrap();
    let pin = {
        let mut g = owner.lock();
        let c = g.register_component("shared", CompType::User).unwrap();
        g.create_pin(c, "shared.v", HalType::S64, PinDir::Out).unwrap()
    };
    owner.pin::<i64>(pin).unwrap().set(1 << 40);

    let other = Hal::attach(&config).unwrap();
    let found = other.find::<PinRecord>("shared.v").unwrap();
    assert_eq!(found, pin);
    assert_eq!(other.pin::<i64>(found).unwrap().get(), 1 << 40);
    assert_ne!(owner.segment().base(), other.segment().base());
}

fn patch_arena(config: &HalConfig, at: u64, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(arena_path(config))
        .unwrap();
    file.seek(SeekFrom::Start(at)).unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn version_mismatch_refuses_attach() {
    let dir = tempfile::tempdir().unwrap();
    let config = HalConfig::in_dir(dir.path());
    let _owner = Hal::create(&config).unwrap();
    // Layout version follows the 8-byte magic
    patch_arena(&config, 8, &0xDEADu32.to_ne_bytes());
    assert!(matches!(
        Hal::attach(&config),
        Err(HalError::VersionMismatch { found: 0xDEAD, .. })
    ));
}

#[test]
fn foreign_file_refuses_attach() {
    let dir = tempfile::tempdir().unwrap();
    let config = HalConfig::in_dir(dir.path());
    let _owner = Hal::create(&config).unwrap();
    patch_arena(&config, 0, b"NOTAHAL\0");
    assert!(matches!(Hal::attach(&config), Err(HalError::Shm(_))));
}

#[test]
fn stale_handles_are_not_found() {
    let (_dir, hal) = new_hal();
    let mut g = hal.lock();
    let c = g.register_component("gone", CompType::User).unwrap();
    let s = g.create_signal("gone.sig", HalType::Bit).unwrap();
    g.delete_signal(s).unwrap();
    assert!(matches!(g.delete_signal(s), Err(HalError::NotFound(_))));
    g.unregister_component(c).unwrap();
    assert!(matches!(g.unregister_component(c), Err(HalError::NotFound(_))));
    assert!(matches!(g.delete_object(c.into()), Err(HalError::NotFound(_))));
}

#[test]
fn exhausted_arena_reports_out_of_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HalConfig::in_dir(dir.path());
    config.arena.size = hal::consts::ARENA_MIN_SIZE;
    let hal = Hal::create(&config).unwrap();
    let mut g = hal.lock();
    let c = g.register_component("big", CompType::User).unwrap();
    let result = (0..10_000).try_for_each(|i| {
        g.create_pin(c, &format!("big.{i}"), HalType::U64, PinDir::In)
            .map(|_| ())
    });
    assert!(matches!(result, Err(HalError::OutOfMemory { .. })));
    // Deleting frees a record that the next create reuses
    let victim = g.find::<PinRecord>("big.0").unwrap();
    g.delete_pin(victim).unwrap();
    g.create_pin(c, "big.again", HalType::U64, PinDir::In).unwrap();
}

fn kind_strategy() -> impl Strategy<Value = u8> {
    0u8..3
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn create_then_find_by_name(
        entries in proptest::collection::btree_map("[a-z][a-z0-9_.]{0,46}", kind_strategy(), 1..12)
    ) {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let owner = g.register_component("0owner", CompType::User).unwrap();
        for (name, kind) in &entries {
            let created: Result<hal_core::ObjectRef, HalError> = match kind {
                0 => g.create_signal(name, HalType::Float).map(Into::into),
                1 => g.create_pin(owner, name, HalType::Bit, PinDir::In).map(Into::into),
                _ => g.create_param(owner, name, HalType::S32, ParamDir::Rw).map(Into::into),
            };
            let created = created.unwrap();
            let found = g.find_by_name(None, name).unwrap();
            prop_assert_eq!(found, created);
            prop_assert_eq!(g.name_of(found), Some(name.clone()));
            prop_assert!(matches!(
                g.create_signal(name, HalType::Bit),
                Err(HalError::DuplicateName(_))
            ));
        }
        prop_assert_eq!(g.objects(None).len(), entries.len() + 1);
    }
}
