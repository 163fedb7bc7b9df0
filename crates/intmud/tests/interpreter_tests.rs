//! End-to-end tests: whole scripts loaded from disk, driven through the
//! public API with a collecting sink.

use intmud::{CollectSink, Config, Scheduler, Value, World};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Writes a project with one source file and loads it.
fn boot(source: &str) -> (World, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("intmud.int"), "incluir = mundo\n").unwrap();
    std::fs::write(dir.path().join("mundo.im"), source).unwrap();
    let config = Config {
        source_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    // swap the sink in before anything runs: load() boots `inicializar`
    let (mut world, diags) = intmud::load_with_sink(config, Box::new(CollectSink::new()))
        .expect("load failure");
    assert!(diags.is_clean(), "diagnostics: {diags:?}");
    world.sink.flush();
    (world, dir)
}

fn output(world: &World) -> String {
    world.sink.collected().unwrap_or_default().to_string()
}

fn field_i64(world: &World, name: &str) -> i64 {
    let main = world.main_obj.expect("main object");
    let id = world.interns.get_name(name).expect("field name");
    world.heap.get(main).expect("main live").fields[&id].to_i64()
}

#[test]
fn hello_world_prints_one_line() {
    let (world, _dir) = boot("classe main\nfunc inicializar\n  escrevaln(\"Olá, Mundo!\")\n  ret 1\n");
    assert_eq!(output(&world), "Olá, Mundo!\n");
}

#[test]
fn inheritance_resolves_through_the_hierarchy() {
    let src = "\
classe a
func f
  ret 1
classe b
herda a
func f
  ret 2
classe c
herda b
classe main
func inicializar
  escrevaln(execobj(criar(\"c\"), \"f\"))
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "2\n");
}

#[test]
fn timer_fires_exactly_once_after_thirty_deciseconds() {
    let src = "\
classe main
inttempo t
int32 disparos
func inicializar
  t = 30
func t_exec
  disparos++
";
    let (mut world, _dir) = boot(src);
    let mut scheduler = Scheduler::new();
    for _ in 0..29 {
        scheduler.tick(&mut world, 1);
    }
    assert_eq!(field_i64(&world, "disparos"), 0);
    scheduler.tick(&mut world, 1);
    assert_eq!(field_i64(&world, "disparos"), 1);
    for _ in 0..10 {
        scheduler.tick(&mut world, 1);
    }
    assert_eq!(field_i64(&world, "disparos"), 1);
}

#[test]
fn lista_remove_duplicates_keeps_first_occurrences() {
    let src = "\
classe item
classe main
listaobj lista
ref a, b, c, d
func inicializar
  a = criar(\"item\")
  b = criar(\"item\")
  c = criar(\"item\")
  d = criar(\"item\")
  lista.addfim(a)
  lista.addfim(b)
  lista.addfim(a)
  lista.addfim(c)
  lista.addfim(b)
  lista.addfim(d)
  lista.addfim(a)
  lista.remduplo
  escrevaln(lista.total)
  escrevaln(lista.prim == a ? \"prim-a\" : \"prim-x\")
  escrevaln(lista.ult == d ? \"ult-d\" : \"ult-x\")
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "4\nprim-a\nult-d\n");
}

#[test]
fn datahora_steps_over_leap_february() {
    let src = "\
classe main
datahora d
func inicializar
  d.ano = 2024
  d.mes = 2
  d.dia = 28
  d.maisdia
  d.maisdia
  escrevaln(d.ano, \"-\", d.mes, \"-\", d.dia)
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "2024-3-1\n");
}

#[test]
fn datahora_number_round_trips() {
    let src = "\
classe main
datahora d
datahora e
func inicializar
  d.ano = 1987
  d.mes = 11
  d.dia = 23
  e.numdata(d.datanum)
  escrevaln(e.ano, \" \", e.mes, \" \", e.dia)
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "1987 11 23\n");
}

#[test]
fn vartroca_substitutes_pairs() {
    let src = "\
classe main
func inicializar
  escrevaln(vartroca(\"hello $name, you are $age\", \"name\", \"Alice\", \"age\", 30))
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "hello Alice, you are 30\n");
}

#[test]
fn colour_markup_renders_and_strips() {
    let rendered = intmud::render("{red}hi{reset}");
    assert!(rendered.contains("\x1b[31m"));
    assert!(rendered.contains("\x1b[0m"));
    assert_eq!(intmud::strip_ansi(&rendered), "hi");
}

#[test]
fn txtcod_round_trips_through_scripts() {
    let src = "\
classe main
func inicializar
  txt80 original = \"a@b\\\"c\"
  se txtdec(txtcod(original)) === original
    escrevaln(\"ok\")
  fimse
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "ok\n");
}

#[test]
fn indexed_objects_resolve_via_dollar_names() {
    let src = "\
classe sala
indiceobj idx
txt80 nome
classe main
func inicializar
  ref s = criar(\"sala\")
  s.idx.nome(\"praca\")
  s.nome = \"Praça Central\"
  escrevaln($praca.nome)
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "Praça Central\n");
}

#[test]
fn intexec_edge_runs_on_next_tick() {
    let src = "\
classe main
intexec gat
int32 vezes
func inicializar
  gat = 1
func gat_exec
  vezes++
";
    let (mut world, _dir) = boot(src);
    let mut scheduler = Scheduler::new();
    scheduler.tick(&mut world, 1);
    assert_eq!(field_i64(&world, "vezes"), 1);
    scheduler.tick(&mut world, 1);
    assert_eq!(field_i64(&world, "vezes"), 1);
}

#[test]
fn common_counts_instances_across_objects() {
    let src = "\
classe bicho
comum int32 vivos
func inicializar
  vivos++
classe main
func inicializar
  criar(\"bicho\")
  criar(\"bicho\")
  criar(\"bicho\")
  escrevaln(bicho:vivos, \" \", inttotal(objprim(\"bicho\")))
";
    let (world, _dir) = boot(src);
    assert_eq!(output(&world), "3 3\n");
}

#[test]
fn terminate_stops_the_loop() {
    let src = "\
classe main
int32 ticks
func aotick
  ticks++
  se ticks >= 2
    terminar
  fimse
";
    let (mut world, _dir) = boot(src);
    let mut scheduler = Scheduler::new();
    scheduler.tick(&mut world, 1);
    assert!(!world.terminate);
    scheduler.tick(&mut world, 1);
    assert!(world.terminate);
}

/// Values used by scripts above stay constructible from the embedding API.
#[test]
fn embedding_invocation_round_trip() {
    let src = "classe main\nfunc soma\n  ret arg0 + arg1\n";
    let (mut world, _dir) = boot(src);
    let main = world.main_obj.unwrap();
    let soma = world.interns.get_name("soma").unwrap();
    world.reset_budget();
    match intmud::invoke(&mut world, main, soma, &[Value::Int(2), Value::Int(40)]) {
        Some(intmud::Invocation::Done(Value::Int(v))) => assert_eq!(v, 42),
        other => panic!("unexpected outcome: {:?}", other.is_some()),
    }
}
