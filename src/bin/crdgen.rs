use pulsar_k8s::crd::all_crds;

fn main() -> anyhow::Result<()> {
    for crd in all_crds() {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
