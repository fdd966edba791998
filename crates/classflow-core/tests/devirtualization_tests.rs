use classflow_core::{AnalysisOutput, BodyId, CallSiteRef, DevirtualizedCallSite};
use classflow_ir::{ExprId, ExprKind, FunId};
use classflow_test_helpers::{analyze, animal_world, BodyBuilder};

/// Resolve a site's callee pairs to `(receiver, callee)` name tuples.
fn callee_names(output: &AnalysisOutput, site: &DevirtualizedCallSite) -> Vec<(String, String)> {
    site.possible_callees
        .iter()
        .map(|&(receiver, callee)| {
            (
                output.symbols.type_name(receiver).to_string(),
                output.symbols.function_name(callee).to_string(),
            )
        })
        .collect()
}

fn site_for<'a>(
    output: &'a AnalysisOutput,
    function: FunId,
    expr: ExprId,
) -> Option<&'a DevirtualizedCallSite> {
    output.devirtualized.iter().find(|site| {
        site.call_site
            == CallSiteRef {
                body: BodyId::Function(function),
                expr,
            }
    })
}

#[test]
fn test_monomorphic_receiver_devirtualizes_to_single_target() {
    // fun main() { val a: Animal = Cat(); a.makeSound() }
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let decl = body.declare_local(a, cat);
    let receiver = body.get_local(a, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![("Cat".to_string(), "Cat.makeSound".to_string())]
    );
}

#[test]
fn test_polymorphic_union_reports_both_targets() {
    // val a: Animal = if (flag) Cat() else Dog(); a.makeSound()
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let flag = body.const_of(string);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let dog = body.new_object(world.dog_ctor, vec![], world.dog);
    let branch = body.if_else(flag, cat, dog, world.animal);
    let decl = body.declare_local(a, branch);
    let receiver = body.get_local(a, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![
            ("Cat".to_string(), "Cat.makeSound".to_string()),
            ("Dog".to_string(), "Dog.makeSound".to_string()),
        ]
    );
}

#[test]
fn test_field_unifies_writes_across_program() {
    // class Box { var a: Animal }; box.a = Cat(); box.a.makeSound()
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let boxed = builder.class("Box", vec![]);
    let box_ctor = builder.constructor(boxed);
    let field = builder.member_field(boxed, "a", world.animal);

    let main = builder.function("main", vec![], unit);
    let b = builder.local(main, "b");
    let mut body = BodyBuilder::new(&builder.program);
    let box_new = body.new_object(box_ctor, vec![], boxed);
    let decl = body.declare_local(b, box_new);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let recv1 = body.get_local(b, boxed);
    let write = body.set_field(Some(recv1), field, cat);
    let recv2 = body.get_local(b, boxed);
    let read = body.get_field(Some(recv2), field, world.animal);
    let call = body.call(world.animal_sound, Some(read), vec![], string);
    let built = body.finish_block(vec![decl, write, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![("Cat".to_string(), "Cat.makeSound".to_string())]
    );
}

#[test]
fn test_second_field_write_widens_result() {
    // As above plus `box2.a = Dog()` anywhere in the program.
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let boxed = builder.class("Box", vec![]);
    let box_ctor = builder.constructor(boxed);
    let field = builder.member_field(boxed, "a", world.animal);

    let main = builder.function("main", vec![], unit);
    let b = builder.local(main, "b");
    let b2 = builder.local(main, "b2");
    let mut body = BodyBuilder::new(&builder.program);
    let box_new = body.new_object(box_ctor, vec![], boxed);
    let decl = body.declare_local(b, box_new);
    let box2_new = body.new_object(box_ctor, vec![], boxed);
    let decl2 = body.declare_local(b2, box2_new);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let recv1 = body.get_local(b, boxed);
    let write1 = body.set_field(Some(recv1), field, cat);
    let dog = body.new_object(world.dog_ctor, vec![], world.dog);
    let recv2 = body.get_local(b2, boxed);
    let write2 = body.set_field(Some(recv2), field, dog);
    let recv3 = body.get_local(b, boxed);
    let read = body.get_field(Some(recv3), field, world.animal);
    let call = body.call(world.animal_sound, Some(read), vec![], string);
    let built = body.finish_block(vec![decl, decl2, write1, write2, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![
            ("Cat".to_string(), "Cat.makeSound".to_string()),
            ("Dog".to_string(), "Dog.makeSound".to_string()),
        ]
    );
}

#[test]
fn test_cast_preserves_narrowed_receiver() {
    // val a: Any = Cat(); (a as Animal).makeSound()
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let any = builder.class("Any", vec![]);
    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let decl = body.declare_local(a, cat);
    let get = body.get_local(a, any);
    let cast = body.cast(get, world.animal);
    let call = body.call(world.animal_sound, Some(cast), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![("Cat".to_string(), "Cat.makeSound".to_string())]
    );
}

#[test]
fn test_library_root_receiver_stays_virtual() {
    // fun handle(a: Animal) = a.makeSound() exported from a library: the
    // receiver is seeded virtually and the site must not devirtualize.
    let world = animal_world("lib", true);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;

    let handle = builder.exported_function("handle", vec![world.animal], string);
    let mut body = BodyBuilder::new(&builder.program);
    let receiver = body.get_param(0, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let ret = body.ret(call);
    let built = body.finish_block(vec![ret]);
    builder.set_body(handle, built);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    assert!(site_for(&output, handle, call).is_none());
}

#[test]
fn test_interface_dispatch_resolves_through_itable() {
    // interface Speaker { fun speak(): String }; class Cat : Animal, Speaker
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let speaker = builder.interface("Speaker", vec![]);
    let speak_decl = builder.abstract_method(speaker, "speak", string, vec![]);
    builder.program.classes[world.cat.index()].supers.push(speaker);
    let cat_speak = builder.method(world.cat, "speak", string, vec![speak_decl]);
    let mut speak_body = BodyBuilder::new(&builder.program);
    let meow = speak_body.const_of(string);
    let ret = speak_body.ret(meow);
    let built = speak_body.finish_block(vec![ret]);
    builder.set_body(cat_speak, built);

    let main = builder.function("main", vec![], unit);
    let s = builder.local(main, "s");
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let decl = body.declare_local(s, cat);
    let receiver = body.get_local(s, speaker);
    let call = body.call(speak_decl, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let site = site_for(&output, main, call).expect("site should be devirtualized");
    assert_eq!(
        callee_names(&output, site),
        vec![("Cat".to_string(), "Cat.speak".to_string())]
    );
}

#[test]
fn test_singleton_private_callee_is_rewritten() {
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let decl = body.declare_local(a, cat);
    let receiver = body.get_local(a, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();
    assert_eq!(output.stats.rewritten_calls, 1);

    let main_body = program.functions[main.index()].body.as_ref().unwrap();
    match main_body.kind(call) {
        ExprKind::DirectPrivateCall {
            module,
            virtual_function_count,
            index,
            ..
        } => {
            assert_eq!(program.interner.resolve(*module), "app");
            // makeSound slots of Animal, Cat and Dog.
            assert_eq!(*virtual_function_count, 3);
            // Cat.makeSound is indexed after Animal.makeSound.
            assert_eq!(*index, 1);
        }
        other => panic!("expected a direct private call, got {other:?}"),
    }
}

#[test]
fn test_polymorphic_site_is_not_rewritten() {
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let flag = body.const_of(string);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let dog = body.new_object(world.dog_ctor, vec![], world.dog);
    let branch = body.if_else(flag, cat, dog, world.animal);
    let decl = body.declare_local(a, branch);
    let receiver = body.get_local(a, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    assert_eq!(output.stats.rewritten_calls, 0);
    let main_body = program.functions[main.index()].body.as_ref().unwrap();
    assert!(matches!(main_body.kind(call), ExprKind::Call { .. }));
}

#[test]
fn test_unreachable_receiver_reports_no_site() {
    // The call sits in a function nothing ever calls; its receiver node
    // collects no types.
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let orphan = builder.function("orphan", vec![world.animal], string);
    let mut body = BodyBuilder::new(&builder.program);
    let receiver = body.get_param(0, world.animal);
    let call = body.call(world.animal_sound, Some(receiver), vec![], string);
    let ret = body.ret(call);
    let built = body.finish_block(vec![ret]);
    builder.set_body(orphan, built);

    let main = builder.function("main", vec![], unit);
    let mut main_body = BodyBuilder::new(&builder.program);
    let cat = main_body.new_object(world.cat_ctor, vec![], world.cat);
    let built = main_body.finish_block(vec![cat]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    assert!(site_for(&output, orphan, call).is_none());
}

#[test]
fn test_adding_allocations_never_shrinks_results() {
    // Monotonicity: the same site with one extra Dog allocation reports a
    // superset of pairs.
    fn build(with_dog: bool) -> (Vec<(String, String)>, FunId, ExprId) {
        let world = animal_world("app", false);
        let mut builder = world.builder;
        let string = builder.program.builtins.string;
        let unit = builder.program.builtins.unit;

        let main = builder.function("main", vec![], unit);
        let a = builder.local(main, "a");
        let mut body = BodyBuilder::new(&builder.program);
        let mut statements = Vec::new();
        let cat = body.new_object(world.cat_ctor, vec![], world.cat);
        let decl = body.declare_local(a, cat);
        statements.push(decl);
        if with_dog {
            let dog = body.new_object(world.dog_ctor, vec![], world.dog);
            let assign = body.set_local(a, dog);
            statements.push(assign);
        }
        let receiver = body.get_local(a, world.animal);
        let call = body.call(world.animal_sound, Some(receiver), vec![], string);
        statements.push(call);
        let built = body.finish_block(statements);
        builder.set_body(main, built);
        builder.set_main(main);

        let mut program = builder.finish();
        let output = analyze(&mut program, &[]).unwrap();
        let site = site_for(&output, main, call).expect("devirtualized");
        (callee_names(&output, site), main, call)
    }

    let (smaller, _, _) = build(false);
    let (larger, _, _) = build(true);
    for pair in &smaller {
        assert!(larger.contains(pair), "{pair:?} dropped by wider program");
    }
    assert!(larger.len() > smaller.len());
}

#[test]
fn test_identical_runs_are_deterministic() {
    fn run() -> (Vec<u8>, Vec<Vec<(String, String)>>) {
        let world = animal_world("app", false);
        let mut builder = world.builder;
        let string = builder.program.builtins.string;
        let unit = builder.program.builtins.unit;

        let main = builder.function("main", vec![], unit);
        let a = builder.local(main, "a");
        let mut body = BodyBuilder::new(&builder.program);
        let flag = body.const_of(string);
        let cat = body.new_object(world.cat_ctor, vec![], world.cat);
        let dog = body.new_object(world.dog_ctor, vec![], world.dog);
        let branch = body.if_else(flag, cat, dog, world.animal);
        let decl = body.declare_local(a, branch);
        let receiver = body.get_local(a, world.animal);
        let call = body.call(world.animal_sound, Some(receiver), vec![], string);
        let built = body.finish_block(vec![decl, call]);
        builder.set_body(main, built);
        builder.set_main(main);

        let mut program = builder.finish();
        let output = analyze(&mut program, &[]).unwrap();
        let sites = output
            .devirtualized
            .iter()
            .map(|site| callee_names(&output, site))
            .collect();
        (output.summary.to_bytes().unwrap(), sites)
    }

    let (bytes_a, sites_a) = run();
    let (bytes_b, sites_b) = run();
    assert_eq!(bytes_a, bytes_b, "summaries must be byte-identical");
    assert_eq!(sites_a, sites_b, "devirtualization map must be identical");
}

#[test]
fn test_private_virtual_function_table_is_ordered() {
    let world = animal_world("app", false);
    let mut builder = world.builder;
    let unit = builder.program.builtins.unit;

    let main = builder.function("main", vec![], unit);
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let built = body.finish_block(vec![cat]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();

    let names: Vec<&str> = output
        .private_virtual_functions
        .iter()
        .map(|&f| output.symbols.function_name(f))
        .collect();
    assert_eq!(
        names,
        vec!["Animal.makeSound", "Cat.makeSound", "Dog.makeSound"]
    );
}
