use classflow_core::{
    AnalysisError, ModuleSummary, SymbolTable, TypeKind,
};
use classflow_ir::method_hash;
use classflow_test_helpers::{analyze, animal_world, BodyBuilder};

/// Compile the exported Animal hierarchy as a library and return its
/// summary. Methods are exported so consumers can reference them.
fn zoo_library_summary() -> ModuleSummary {
    let world = animal_world("zoolib", true);
    let mut builder = world.builder;

    for method in [world.animal_sound, world.cat_sound, world.dog_sound] {
        builder.program.functions[method.index()].is_exported = true;
    }

    // exported fun makeCat(): Animal = Cat()
    let make_cat = builder.exported_function("makeCat", vec![], world.animal);
    let mut body = BodyBuilder::new(&builder.program);
    let cat = body.new_object(world.cat_ctor, vec![], world.cat);
    let ret = body.ret(cat);
    let built = body.finish_block(vec![ret]);
    builder.set_body(make_cat, built);

    let mut program = builder.finish();
    analyze(&mut program, &[]).unwrap().summary
}

#[test]
fn test_summary_roundtrip_preserves_hierarchy() {
    let summary = zoo_library_summary();
    let bytes = summary.to_bytes().unwrap();
    let reloaded = ModuleSummary::from_bytes(&bytes).unwrap();

    let mut symbols = SymbolTable::new();
    reloaded.load_into(&mut symbols).unwrap();

    let animal = symbols.lookup_public_type("Animal").expect("Animal");
    let cat = symbols.lookup_public_type("Cat").expect("Cat");
    let dog = symbols.lookup_public_type("Dog").expect("Dog");

    assert!(symbols.is_subtype(cat, animal));
    assert!(symbols.is_subtype(dog, animal));
    assert!(!symbols.is_subtype(cat, dog));

    // Vtables carry the concrete overrides.
    let cat_entry = symbols.type_entry(cat);
    assert_eq!(cat_entry.vtable.len(), 1);
    assert_eq!(
        symbols.function_name(cat_entry.vtable[0]),
        "Cat.makeSound"
    );
    let animal_entry = symbols.type_entry(animal);
    assert_eq!(
        symbols.function_name(animal_entry.vtable[0]),
        "Animal.makeSound"
    );
}

#[test]
fn test_summary_roundtrip_preserves_itable() {
    let world = animal_world("zoolib", true);
    let mut builder = world.builder;
    let string = builder.program.builtins.string;

    let speaker = builder.interface("Speaker", vec![]);
    builder.program.classes[speaker.index()].is_exported = true;
    let speak_decl = builder.abstract_method(speaker, "speak", string, vec![]);
    builder.program.classes[world.cat.index()].supers.push(speaker);
    let cat_speak = builder.method(world.cat, "speak", string, vec![speak_decl]);
    builder.program.functions[cat_speak.index()].is_exported = true;
    let mut body = BodyBuilder::new(&builder.program);
    let meow = body.const_of(string);
    let ret = body.ret(meow);
    let built = body.finish_block(vec![ret]);
    builder.set_body(cat_speak, built);

    let mut program = builder.finish();
    let summary = analyze(&mut program, &[]).unwrap().summary;

    let mut symbols = SymbolTable::new();
    summary.load_into(&mut symbols).unwrap();

    let cat = symbols.lookup_public_type("Cat").expect("Cat");
    let entry = symbols.type_entry(cat);
    let implementation = entry
        .itable_lookup(method_hash("speak"))
        .expect("itable entry for speak");
    assert_eq!(symbols.function_name(implementation), "Cat.speak");
}

#[test]
fn test_summary_file_roundtrip_and_corruption() {
    let summary = zoo_library_summary();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zoolib.summary");

    summary.write_to(&path).unwrap();
    let reloaded = ModuleSummary::read_from(&path).unwrap();
    assert_eq!(
        summary.compute_hash().unwrap(),
        reloaded.compute_hash().unwrap()
    );

    // Flip a payload byte and expect the checksum to catch it.
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();
    let err = ModuleSummary::read_from(&path).unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::CorruptedSummary { .. } | AnalysisError::Serialization(_)
    ));
}

#[test]
fn test_private_entities_renumber_on_load() {
    // Two libraries with identically named private classes must not collide
    // in the consumer's private index space.
    fn private_lib(module: &str) -> ModuleSummary {
        let world = animal_world(module, false);
        let mut program = world.builder.finish();
        analyze(&mut program, &[]).unwrap().summary
    }

    let lib_a = private_lib("libA");
    let lib_b = private_lib("libB");

    let mut symbols = SymbolTable::new();
    lib_a.load_into(&mut symbols).unwrap();
    lib_b.load_into(&mut symbols).unwrap();

    let mut private_indices = Vec::new();
    for (_, entry) in symbols.types() {
        if let TypeKind::Private { index, .. } = entry.kind {
            private_indices.push(index);
        }
    }
    let mut deduped = private_indices.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), private_indices.len(), "indices must be unique");
    // Both libraries contribute Animal, Cat and Dog.
    assert_eq!(private_indices.len(), 6);
}

#[test]
fn test_consumer_devirtualizes_through_library_summary() {
    // Consumer: val a: Animal = makeCat(); a.makeSound() — with the library
    // summary loaded, the external receiver resolves and the site
    // devirtualizes to Cat.makeSound.
    let library = zoo_library_summary();

    let mut builder = classflow_test_helpers::ProgramBuilder::library("app");
    let string = builder.program.builtins.string;
    let unit = builder.program.builtins.unit;

    let animal = builder.external_class("Animal");
    let make_sound = builder.external_method(animal, "makeSound", string);
    let make_cat = builder.external_function("makeCat", vec![], animal);

    let main = builder.function("main", vec![], unit);
    let a = builder.local(main, "a");
    let mut body = BodyBuilder::new(&builder.program);
    let made = body.call(make_cat, None, vec![], animal);
    let decl = body.declare_local(a, made);
    let receiver = body.get_local(a, animal);
    let call = body.call(make_sound, Some(receiver), vec![], string);
    let built = body.finish_block(vec![decl, call]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[library]).unwrap();

    assert_eq!(output.devirtualized.len(), 1);
    let site = &output.devirtualized[0];
    let names: Vec<(&str, &str)> = site
        .possible_callees
        .iter()
        .map(|&(t, f)| {
            (
                output.symbols.type_name(t),
                output.symbols.function_name(f),
            )
        })
        .collect();
    assert_eq!(names, vec![("Cat", "Cat.makeSound")]);
}

#[test]
fn test_unknown_external_downgrades_without_failing() {
    // No library summary loaded: the external callee yields an opaque
    // result and the analysis still completes.
    let mut builder = classflow_test_helpers::ProgramBuilder::library("app");
    let unit = builder.program.builtins.unit;

    let animal = builder.external_class("Animal");
    let make_cat = builder.external_function("makeCat", vec![], animal);

    let main = builder.function("main", vec![], unit);
    let mut body = BodyBuilder::new(&builder.program);
    let made = body.call(make_cat, None, vec![], animal);
    let built = body.finish_block(vec![made]);
    builder.set_body(main, built);
    builder.set_main(main);

    let mut program = builder.finish();
    let output = analyze(&mut program, &[]).unwrap();
    assert!(output.devirtualized.is_empty());
}
