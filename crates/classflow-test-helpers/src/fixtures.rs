//! Ready-made IR fixtures.

use classflow_ir::{ClassId, FunId};

use crate::builder::{BodyBuilder, ProgramBuilder};

/// The `Animal <- Cat, Dog` hierarchy with `makeSound(): String` overridden
/// in both subclasses, plus a constructor per class.
pub struct AnimalWorld {
    pub builder: ProgramBuilder,
    pub animal: ClassId,
    pub cat: ClassId,
    pub dog: ClassId,
    pub animal_sound: FunId,
    pub cat_sound: FunId,
    pub dog_sound: FunId,
    pub animal_ctor: FunId,
    pub cat_ctor: FunId,
    pub dog_ctor: FunId,
}

/// Build the hierarchy in a fresh library module. `exported` controls
/// whether the classes are visible to other modules.
pub fn animal_world(module_name: &str, exported: bool) -> AnimalWorld {
    let mut builder = ProgramBuilder::library(module_name);
    let string = builder.program.builtins.string;

    let (animal, cat, dog) = if exported {
        let animal = builder.exported_class("Animal", vec![]);
        let cat = builder.exported_class("Cat", vec![animal]);
        let dog = builder.exported_class("Dog", vec![animal]);
        (animal, cat, dog)
    } else {
        let animal = builder.class("Animal", vec![]);
        let cat = builder.class("Cat", vec![animal]);
        let dog = builder.class("Dog", vec![animal]);
        (animal, cat, dog)
    };

    let animal_sound = builder.method(animal, "makeSound", string, vec![]);
    let cat_sound = builder.method(cat, "makeSound", string, vec![animal_sound]);
    let dog_sound = builder.method(dog, "makeSound", string, vec![animal_sound]);

    // Each body returns a string literal ("generic noise" / "meow" / "woof").
    for method in [animal_sound, cat_sound, dog_sound] {
        let mut body = BodyBuilder::new(&builder.program);
        let sound = body.const_of(string);
        let ret = body.ret(sound);
        let built = body.finish_block(vec![ret]);
        builder.set_body(method, built);
    }

    let animal_ctor = builder.constructor(animal);
    let cat_ctor = builder.constructor(cat);
    let dog_ctor = builder.constructor(dog);

    AnimalWorld {
        builder,
        animal,
        cat,
        dog,
        animal_sound,
        cat_sound,
        dog_sound,
        animal_ctor,
        cat_ctor,
        dog_ctor,
    }
}
